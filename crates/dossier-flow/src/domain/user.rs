use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{EntrepriseId, UserId};
use crate::workflow::UnknownValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Rh,
    Consultant,
    User,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Rh => "rh",
            Self::Consultant => "consultant",
            Self::User => "user",
        }
    }

    pub const fn can_manage_entreprises(self) -> bool {
        matches!(self, Self::Admin)
    }

    pub const fn can_create_dossiers(self) -> bool {
        matches!(self, Self::Admin | Self::Rh | Self::Consultant)
    }

    pub const fn can_issue_factures(self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownValue;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "admin" => Ok(Self::Admin),
            "rh" => Ok(Self::Rh),
            "consultant" => Ok(Self::Consultant),
            "user" => Ok(Self::User),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

/// Back-office account. The password hash never leaves the service layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub entreprise_id: Option<EntrepriseId>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// E-mail addresses are compared case-insensitively.
    pub fn normalize_email(raw: &str) -> String {
        raw.trim().to_ascii_lowercase()
    }
}
