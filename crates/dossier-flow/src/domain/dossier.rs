use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{DossierId, EntrepriseId, HistoriqueId, UserId};
use crate::workflow::{DossierKind, DossierStatus, UnknownValue};

/// Regulatory ceiling for a bilan de compétences.
pub const BILAN_MAX_HOURS: u32 = 24;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beneficiary {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl Beneficiary {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
    }
}

/// Case file tracking a funding request from creation through invoicing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dossier {
    pub id: DossierId,
    pub reference: String,
    pub kind: DossierKind,
    pub status: DossierStatus,
    pub entreprise_id: EntrepriseId,
    pub beneficiary: Beneficiary,
    pub consultant_id: Option<UserId>,
    pub hours_planned: u32,
    pub hours_completed: u32,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Dossier {
    pub fn reference_for(year: i32, sequence: u32) -> String {
        format!("DOS-{year}-{sequence:05}")
    }

    pub fn validate_schedule(
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<(), DossierError> {
        match (start, end) {
            (Some(start), Some(end)) if end < start => {
                Err(DossierError::InvertedDateRange { start, end })
            }
            _ => Ok(()),
        }
    }

    pub fn validate_hours(
        kind: DossierKind,
        planned: u32,
        completed: u32,
    ) -> Result<(), DossierError> {
        if kind == DossierKind::BilanCompetences && planned > BILAN_MAX_HOURS {
            return Err(DossierError::BilanHoursExceeded(planned));
        }
        if completed > planned {
            return Err(DossierError::CompletedExceedsPlanned { planned, completed });
        }
        Ok(())
    }

    /// Remaining hours of the planned volume.
    pub fn hours_remaining(&self) -> u32 {
        self.hours_planned.saturating_sub(self.hours_completed)
    }

    pub fn hours_summary(&self) -> String {
        format!("{}/{}h", self.hours_completed, self.hours_planned)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DossierError {
    #[error("end date {end} precedes start date {start}")]
    InvertedDateRange { start: NaiveDate, end: NaiveDate },
    #[error("a bilan de compétences is limited to 24 hours, got {0}")]
    BilanHoursExceeded(u32),
    #[error("completed hours ({completed}) exceed planned hours ({planned})")]
    CompletedExceedsPlanned { planned: u32, completed: u32 },
    #[error("beneficiary name is required")]
    MissingBeneficiary,
    #[error("dossier {0} is closed")]
    Closed(DossierStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoriqueAction {
    Created,
    StatusChange,
    HoursUpdate,
    NoteUpdate,
    DocumentAdded,
    FactureUpdate,
}

impl HistoriqueAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::StatusChange => "status_change",
            Self::HoursUpdate => "hours_update",
            Self::NoteUpdate => "note_update",
            Self::DocumentAdded => "document_added",
            Self::FactureUpdate => "facture_update",
        }
    }
}

impl fmt::Display for HistoriqueAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoriqueAction {
    type Err = UnknownValue;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "created" => Ok(Self::Created),
            "status_change" => Ok(Self::StatusChange),
            "hours_update" => Ok(Self::HoursUpdate),
            "note_update" => Ok(Self::NoteUpdate),
            "document_added" => Ok(Self::DocumentAdded),
            "facture_update" => Ok(Self::FactureUpdate),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

/// Immutable audit row attached to a dossier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoriqueEntry {
    pub id: HistoriqueId,
    pub dossier_id: DossierId,
    pub actor_id: UserId,
    pub action: HistoriqueAction,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub comment: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl HistoriqueEntry {
    pub fn new(
        dossier_id: DossierId,
        actor_id: UserId,
        action: HistoriqueAction,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: HistoriqueId::new(),
            dossier_id,
            actor_id,
            action,
            old_value: None,
            new_value: None,
            comment: None,
            recorded_at,
        }
    }

    pub fn values(mut self, old: Option<String>, new: Option<String>) -> Self {
        self.old_value = old;
        self.new_value = new;
        self
    }

    pub fn comment(mut self, comment: Option<String>) -> Self {
        self.comment = comment
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        self
    }
}
