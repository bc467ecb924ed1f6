use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keystone_auth::RefreshTokenRecord;
use keystone_core::{RecordId, ResourceId, SubjectId};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access-token expiry.
    pub expires_at: DateTime<Utc>,
    pub refresh_token_expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SuccessResponse {
    pub success: bool,
}

/// A session as shown to its owner. Never carries the token string.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionView {
    pub id: RecordId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub device: Option<String>,
    pub origin: Option<String>,
}

impl From<RefreshTokenRecord> for SessionView {
    fn from(r: RefreshTokenRecord) -> Self {
        Self {
            id: r.id,
            issued_at: r.issued_at,
            expires_at: r.expires_at,
            device: r.device,
            origin: r.origin,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct WhoAmIResponse {
    pub subject_id: SubjectId,
    pub token_id: uuid::Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccessCheckResponse {
    pub allowed: bool,
    pub subject_id: SubjectId,
    pub resource_id: ResourceId,
}
