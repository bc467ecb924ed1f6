//! `keystone-auth`: pure authentication/authorization boundary.
//!
//! No HTTP and no storage here. Owns the refresh-token record and its state
//! machine, opaque token generation, access-credential claims, and the
//! permission-graph traversal.

pub mod claims;
pub mod generator;
pub mod graph;
pub mod jwt;
pub mod policy;
pub mod token;

pub use claims::{AccessClaims, ClaimsValidationError, validate_claims};
pub use generator::{OsTokenGenerator, SecureTokenGenerator, TOKEN_ENTROPY_BYTES};
pub use graph::{
    ActionRef, AuthorizationExplanation, DenialKind, InactiveLink, PermissionEdge, RoleMembership,
    active_role_ids, explain, is_granted,
};
pub use jwt::{
    AccessTokenError, AccessTokenIssuer, Hs256AccessTokens, IssuedAccessToken, JwtValidator,
};
pub use policy::{MAX_ACCESS_TOKEN_TTL_DAYS, MAX_LONG_LIVED_DAYS, PolicyError, TokenPolicy};
pub use token::{NewRefreshToken, RefreshTokenRecord, TokenState, TokenTransitionError};
