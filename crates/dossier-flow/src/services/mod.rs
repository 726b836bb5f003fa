//! Application services: each operation authorizes the actor, validates input, writes
//! through the store and, for workflow moves, dispatches side effects afterwards.

pub mod adapters;
mod dispatch;
mod documents;
mod dossiers;
mod entreprises;
mod factures;
mod notifier;
mod ports;

pub use dispatch::{DispatchReport, Dispatcher};
pub use documents::{DocumentService, UploadRequest};
pub use dossiers::{DossierService, NewDossier, TransitionOutcome, CSV_HEADERS};
pub use entreprises::{EntrepriseService, RegisterEntreprise};
pub use factures::{FactureOutcome, FactureService, IssueFacture, DEFAULT_PAYMENT_TERM_DAYS};
pub use notifier::{render, Notifier, TemplateValues};
pub use ports::{
    BlobStorage, CompanyRecord, CompanyRegistry, GatewayError, Mailer, OutgoingEmail,
    PdfContext, PdfRenderer, StoredBlob,
};

use crate::auth::Actor;
use crate::domain::{Dossier, DossierError, DossierId, FactureError, SiretError};
use crate::repository::{RepositoryError, Store};
use crate::workflow::WorkflowError;

/// Error raised by the application services.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Dossier(#[from] DossierError),
    #[error(transparent)]
    Facture(#[from] FactureError),
    #[error("invalid SIRET: {0}")]
    Siret(#[from] SiretError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Validation(String),
    #[error("export failed: {0}")]
    Export(String),
}

/// Loads a dossier the actor is allowed to see.
fn visible_dossier(
    store: &dyn Store,
    id: DossierId,
    actor: &Actor,
) -> Result<Dossier, ServiceError> {
    let dossier = store
        .find_dossier(id)?
        .ok_or(ServiceError::NotFound("dossier"))?;
    if !actor.can_view_dossier(&dossier) {
        return Err(ServiceError::Forbidden(format!(
            "dossier {} is not accessible",
            dossier.reference
        )));
    }
    Ok(dossier)
}

fn editable_dossier(
    store: &dyn Store,
    id: DossierId,
    actor: &Actor,
) -> Result<Dossier, ServiceError> {
    let dossier = visible_dossier(store, id, actor)?;
    if !actor.can_edit_dossier(&dossier) {
        return Err(ServiceError::Forbidden(format!(
            "role {} may not modify dossier {}",
            actor.role, dossier.reference
        )));
    }
    Ok(dossier)
}
