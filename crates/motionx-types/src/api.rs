use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Profile;

// -- JWT Claims --

/// Session claims issued by the auth provider. Shared by the HTTP
/// middleware and the realtime gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: usize,
}

// -- Upload relay --

/// Error code the relay uses when the blob write credential is missing.
pub const UPLOAD_NOT_CONFIGURED: &str = "not_configured";

/// Envelope returned by `POST /api/upload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl UploadResponse {
    pub fn ok(url: String) -> Self {
        Self {
            success: true,
            url: Some(url),
            error: None,
            code: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            url: None,
            error: Some(message.into()),
            code: None,
        }
    }

    pub fn not_configured() -> Self {
        Self {
            code: Some(UPLOAD_NOT_CONFIGURED.to_string()),
            ..Self::err("Upload service not configured")
        }
    }

    pub fn is_not_configured(&self) -> bool {
        self.code.as_deref() == Some(UPLOAD_NOT_CONFIGURED)
    }
}

// -- Session --

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub user_id: Uuid,
    pub profile: Profile,
    /// True when the profile row was created by this request.
    pub provisioned: bool,
}
