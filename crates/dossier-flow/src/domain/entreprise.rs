use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::EntrepriseId;
use super::siret::Siret;

/// Funding body attached to a company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpcoContact {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentSource {
    Registry,
    Manual,
}

impl EnrichmentSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Registry => "registry",
            Self::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entreprise {
    pub id: EntrepriseId,
    pub siret: Siret,
    pub raison_sociale: String,
    pub address: Option<String>,
    pub naf_code: Option<String>,
    pub contact_email: Option<String>,
    pub opco: Option<OpcoContact>,
    pub source: EnrichmentSource,
    pub created_at: DateTime<Utc>,
}
