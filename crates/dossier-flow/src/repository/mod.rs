//! Storage abstractions so the services can be exercised against memory or SQLite.
//!
//! Every write that touches a dossier takes the historique entry describing it, and
//! implementations persist both in one unit of work.

mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    Document, Dossier, DossierId, EmailLog, Entreprise, EntrepriseId, Facture, FactureId,
    HistoriqueEntry, RefreshTokenId, Siret, User, UserId,
};
use crate::workflow::{DossierKind, DossierStatus};

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists: {0}")]
    Conflict(String),
    #[error("record not found")]
    NotFound,
    #[error("record was modified concurrently")]
    Stale,
    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Criteria for dossier listings. `None` fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DossierFilter {
    #[serde(default)]
    pub status: Option<DossierStatus>,
    #[serde(default)]
    pub kind: Option<DossierKind>,
    #[serde(default)]
    pub entreprise_id: Option<EntrepriseId>,
    #[serde(default)]
    pub consultant_id: Option<UserId>,
}

impl DossierFilter {
    pub fn matches(&self, dossier: &Dossier) -> bool {
        self.status.map_or(true, |status| dossier.status == status)
            && self.kind.map_or(true, |kind| dossier.kind == kind)
            && self
                .entreprise_id
                .map_or(true, |id| dossier.entreprise_id == id)
            && self
                .consultant_id
                .map_or(true, |id| dossier.consultant_id == Some(id))
    }
}

/// Named counters backing human-readable references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceScope {
    Dossier,
    Facture,
}

impl SequenceScope {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dossier => "dossier",
            Self::Facture => "facture",
        }
    }
}

/// Stored refresh token; only the SHA-256 digest of the secret is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: RefreshTokenId,
    pub user_id: UserId,
    pub token_hash: String,
    pub family_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by: Option<RefreshTokenId>,
}

pub trait UserRepository: Send + Sync {
    fn insert_user(&self, user: &User) -> Result<(), RepositoryError>;
    fn find_user(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;
}

pub trait EntrepriseRepository: Send + Sync {
    fn insert_entreprise(&self, entreprise: &Entreprise) -> Result<(), RepositoryError>;
    fn update_entreprise(&self, entreprise: &Entreprise) -> Result<(), RepositoryError>;
    fn find_entreprise(&self, id: EntrepriseId) -> Result<Option<Entreprise>, RepositoryError>;
    fn find_entreprise_by_siret(
        &self,
        siret: &Siret,
    ) -> Result<Option<Entreprise>, RepositoryError>;
    fn list_entreprises(&self) -> Result<Vec<Entreprise>, RepositoryError>;
}

pub trait DossierRepository: Send + Sync {
    fn insert_dossier(
        &self,
        dossier: &Dossier,
        created: &HistoriqueEntry,
    ) -> Result<(), RepositoryError>;

    /// Persists `dossier` and appends `entry` atomically, provided the stored status
    /// still equals `expected_status`.
    fn update_dossier(
        &self,
        dossier: &Dossier,
        expected_status: DossierStatus,
        entry: &HistoriqueEntry,
    ) -> Result<(), RepositoryError>;

    fn find_dossier(&self, id: DossierId) -> Result<Option<Dossier>, RepositoryError>;
    fn list_dossiers(&self, filter: &DossierFilter) -> Result<Vec<Dossier>, RepositoryError>;

    /// Audit trail in recording order.
    fn history(&self, id: DossierId) -> Result<Vec<HistoriqueEntry>, RepositoryError>;
}

pub trait DocumentRepository: Send + Sync {
    fn insert_document(
        &self,
        document: &Document,
        entry: &HistoriqueEntry,
    ) -> Result<(), RepositoryError>;
    fn list_documents(&self, dossier_id: DossierId) -> Result<Vec<Document>, RepositoryError>;
}

pub trait FactureRepository: Send + Sync {
    /// Inserts the invoice and moves the dossier to its invoiced status in one unit.
    fn insert_facture(
        &self,
        facture: &Facture,
        dossier: &Dossier,
        expected_status: DossierStatus,
        entry: &HistoriqueEntry,
    ) -> Result<(), RepositoryError>;
    fn update_facture(
        &self,
        facture: &Facture,
        entry: &HistoriqueEntry,
    ) -> Result<(), RepositoryError>;
    fn find_facture(&self, id: FactureId) -> Result<Option<Facture>, RepositoryError>;
    fn list_factures(&self, dossier_id: DossierId) -> Result<Vec<Facture>, RepositoryError>;
}

pub trait EmailLogRepository: Send + Sync {
    fn insert_email(&self, email: &EmailLog) -> Result<(), RepositoryError>;
    fn list_emails(&self, dossier_id: DossierId) -> Result<Vec<EmailLog>, RepositoryError>;
}

pub trait RefreshTokenRepository: Send + Sync {
    fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), RepositoryError>;
    fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, RepositoryError>;

    /// Revokes `current` and stores `replacement`; fails with `Stale` when `current`
    /// was already revoked.
    fn rotate_refresh_token(
        &self,
        current: RefreshTokenId,
        replacement: &RefreshTokenRecord,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Revokes every live token of the family, returning how many were revoked.
    fn revoke_family(&self, family_id: Uuid, at: DateTime<Utc>) -> Result<usize, RepositoryError>;
}

pub trait SequenceRepository: Send + Sync {
    /// Returns the next value of the yearly counter, starting at 1.
    fn next_sequence(&self, scope: SequenceScope, year: i32) -> Result<u32, RepositoryError>;
}

/// Everything the services need from persistence.
pub trait Store:
    UserRepository
    + EntrepriseRepository
    + DossierRepository
    + DocumentRepository
    + FactureRepository
    + EmailLogRepository
    + RefreshTokenRepository
    + SequenceRepository
{
}

impl<T> Store for T where
    T: UserRepository
        + EntrepriseRepository
        + DossierRepository
        + DocumentRepository
        + FactureRepository
        + EmailLogRepository
        + RefreshTokenRepository
        + SequenceRepository
{
}
