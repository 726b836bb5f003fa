//! Records managed by the back office.

mod document;
mod dossier;
mod email;
mod entreprise;
mod facture;
mod ids;
mod siret;
mod user;

pub use document::{Document, DocumentKind};
pub use dossier::{
    Beneficiary, Dossier, DossierError, HistoriqueAction, HistoriqueEntry, BILAN_MAX_HOURS,
};
pub use email::{EmailLog, EmailStatus};
pub use entreprise::{Entreprise, EnrichmentSource, OpcoContact};
pub use facture::{
    Facture, FactureError, FactureNumber, FactureStatus, MAX_AMOUNT_HT_CENTS, MAX_PAYMENT_TERM_DAYS,
};
pub use ids::{
    DocumentId, DossierId, EmailId, EntrepriseId, FactureId, HistoriqueId, RefreshTokenId, UserId,
};
pub use siret::{Siret, SiretError};
pub use user::{Role, User};
