//! Serde types matching FinTrack API responses that have no domain counterpart.

use serde::{Deserialize, Serialize};

/// `GET /api/users/profile/timestamp`
#[derive(Debug, Deserialize)]
pub struct ApiProfileTimestamp {
  pub updated_at: Option<String>,
}

/// `GET /api/finance/timestamp`
#[derive(Debug, Deserialize)]
pub struct ApiFinanceTimestamp {
  pub last_updated: Option<String>,
  #[serde(default)]
  pub balance_updated: Option<String>,
}

/// Error and acknowledgement bodies (`{"message": ...}`)
#[derive(Debug, Deserialize)]
pub struct ApiMessage {
  #[serde(default)]
  pub message: Option<String>,
}

/// `POST /api/users/profile/photo` (mobile JSON variant)
#[derive(Debug, Serialize)]
pub struct ApiPhotoUpload<'a> {
  pub photo: &'a str,
}

/// `GET /api/health`
#[derive(Debug, Clone, Deserialize)]
pub struct ApiHealth {
  pub status: String,
  #[serde(default)]
  pub timestamp: Option<String>,
}
