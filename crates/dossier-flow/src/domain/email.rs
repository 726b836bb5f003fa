use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{DossierId, EmailId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    Sent,
    Failed,
}

impl EmailStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

/// Record of one delivery attempt, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailLog {
    pub id: EmailId,
    pub dossier_id: Option<DossierId>,
    pub recipient: String,
    pub template: String,
    pub subject: String,
    pub body: String,
    pub status: EmailStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}
