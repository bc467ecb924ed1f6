//! Opaque refresh-token string generation.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;

/// Raw entropy per token (512 bits).
pub const TOKEN_ENTROPY_BYTES: usize = 64;

/// Produces cryptographically unpredictable, URL-safe opaque strings.
pub trait SecureTokenGenerator: Send + Sync + core::fmt::Debug {
    fn generate(&self) -> String;
}

/// Generator backed by the operating system CSPRNG.
///
/// Failure of the OS entropy source panics; there is no recoverable path.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsTokenGenerator;

impl SecureTokenGenerator for OsTokenGenerator {
    fn generate(&self) -> String {
        let mut bytes = [0u8; TOKEN_ENTROPY_BYTES];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}
