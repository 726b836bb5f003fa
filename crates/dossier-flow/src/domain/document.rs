use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{DocumentId, DossierId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Convention,
    Attestation,
    FeuillePresence,
    Facture,
    Synthese,
    DemandePriseEnCharge,
    Autre,
}

impl DocumentKind {
    pub const ALL: [Self; 7] = [
        Self::Convention,
        Self::Attestation,
        Self::FeuillePresence,
        Self::Facture,
        Self::Synthese,
        Self::DemandePriseEnCharge,
        Self::Autre,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Convention => "convention",
            Self::Attestation => "attestation",
            Self::FeuillePresence => "feuille_presence",
            Self::Facture => "facture",
            Self::Synthese => "synthese",
            Self::DemandePriseEnCharge => "demande_prise_en_charge",
            Self::Autre => "autre",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw.trim())
    }
}

/// Metadata of a file stored in external blob storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub dossier_id: DossierId,
    pub name: String,
    pub storage_key: String,
    pub url: Option<String>,
    pub kind: DocumentKind,
    pub content_type: String,
    pub size_bytes: u64,
    pub uploaded_by: UserId,
    pub created_at: DateTime<Utc>,
}
