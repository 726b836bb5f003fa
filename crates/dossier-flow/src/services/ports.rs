//! Boundaries to the systems the back office talks to but does not own.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{OpcoContact, Siret};
use crate::workflow::PdfKind;

/// Company data returned by the public registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub raison_sociale: String,
    pub address: Option<String>,
    pub naf_code: Option<String>,
    pub contact_email: Option<String>,
    pub opco: Option<OpcoContact>,
}

/// Fully rendered message handed to the delivery provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Location of an uploaded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub key: String,
    pub url: Option<String>,
}

/// Values substituted into a rendered PDF.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PdfContext {
    pub title: String,
    pub fields: BTreeMap<String, String>,
}

pub trait CompanyRegistry: Send + Sync {
    /// `Ok(None)` when the registry has no establishment for this SIRET.
    fn lookup(&self, siret: &Siret) -> Result<Option<CompanyRecord>, GatewayError>;
}

pub trait Mailer: Send + Sync {
    fn send(&self, email: &OutgoingEmail) -> Result<(), GatewayError>;
}

pub trait BlobStorage: Send + Sync {
    fn put(&self, key: &str, content_type: &str, bytes: &[u8]) -> Result<StoredBlob, GatewayError>;
}

pub trait PdfRenderer: Send + Sync {
    fn render(&self, kind: PdfKind, context: &PdfContext) -> Result<Vec<u8>, GatewayError>;
}

/// Failure reported by an external collaborator.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{service} unavailable: {reason}")]
    Unavailable {
        service: &'static str,
        reason: String,
    },
    #[error("{service} rejected the request: {reason}")]
    Rejected {
        service: &'static str,
        reason: String,
    },
}
