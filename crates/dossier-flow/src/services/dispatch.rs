use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::documents::storage_key;
use super::notifier::{Notifier, TemplateValues};
use super::ports::{BlobStorage, PdfContext, PdfRenderer};
use crate::domain::{
    Document, DocumentId, DocumentKind, Dossier, EmailLog, HistoriqueAction, HistoriqueEntry,
    UserId,
};
use crate::repository::{RepositoryError, Store};
use crate::workflow::{EffectContext, PdfKind, SideEffect};

/// What happened while executing the side effects of one transition.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub documents: Vec<Document>,
    pub emails: Vec<EmailLog>,
    pub failures: Vec<String>,
}

fn document_kind(kind: PdfKind) -> DocumentKind {
    match kind {
        PdfKind::Synthese => DocumentKind::Synthese,
        PdfKind::DemandePriseEnCharge => DocumentKind::DemandePriseEnCharge,
        PdfKind::Facture => DocumentKind::Facture,
    }
}

fn pdf_title(kind: PdfKind, dossier: &Dossier) -> String {
    let label = match kind {
        PdfKind::Synthese => "Synthèse du bilan de compétences",
        PdfKind::DemandePriseEnCharge => "Demande de prise en charge",
        PdfKind::Facture => "Facture",
    };
    format!("{label} - {}", dossier.reference)
}

/// Runs transition side effects after the transition itself has been committed.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    notifier: Notifier,
    storage: Arc<dyn BlobStorage>,
    renderer: Arc<dyn PdfRenderer>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Notifier,
        storage: Arc<dyn BlobStorage>,
        renderer: Arc<dyn PdfRenderer>,
    ) -> Self {
        Self {
            store,
            notifier,
            storage,
            renderer,
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Recipient addresses and template values for `dossier`.
    pub fn context(
        &self,
        dossier: &Dossier,
    ) -> Result<(EffectContext, TemplateValues), RepositoryError> {
        let entreprise = self.store.find_entreprise(dossier.entreprise_id)?;

        let context = EffectContext {
            reference: dossier.reference.clone(),
            beneficiary_email: dossier.beneficiary.email.clone(),
            entreprise_email: entreprise
                .as_ref()
                .and_then(|entreprise| entreprise.contact_email.clone()),
            opco_email: entreprise
                .as_ref()
                .and_then(|entreprise| entreprise.opco.as_ref())
                .and_then(|opco| opco.email.clone()),
        };

        let mut values = TemplateValues::new();
        values.insert("reference".into(), dossier.reference.clone());
        values.insert("beneficiaire".into(), dossier.beneficiary.full_name());
        values.insert("type".into(), dossier.kind.label().to_string());
        values.insert("statut".into(), dossier.status.label().to_string());
        values.insert("heures".into(), dossier.hours_summary());
        values.insert("commentaire".into(), String::new());
        if let Some(entreprise) = entreprise {
            values.insert("entreprise".into(), entreprise.raison_sociale);
            values.insert("siret".into(), entreprise.siret.as_str().to_string());
            if let Some(opco) = entreprise.opco {
                values.insert("opco".into(), opco.name);
            }
        }

        Ok((context, values))
    }

    /// Executes `effects` in order. Failures are logged and reported, never propagated.
    pub fn dispatch(
        &self,
        dossier: &Dossier,
        effects: &[SideEffect],
        values: &TemplateValues,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        for effect in effects {
            match effect {
                SideEffect::GeneratePdf { kind } => {
                    match self.generate_pdf(dossier, *kind, values, actor, now) {
                        Ok(document) => report.documents.push(document),
                        Err(reason) => {
                            warn!(dossier = %dossier.reference, pdf = kind.as_str(), %reason, "pdf generation failed");
                            report.failures.push(format!("{}: {reason}", kind.as_str()));
                        }
                    }
                }
                SideEffect::Email {
                    template,
                    recipient,
                } => {
                    let log =
                        self.notifier
                            .notify(*template, recipient, Some(dossier.id), values, now);
                    if let Some(error) = &log.error {
                        report
                            .failures
                            .push(format!("{}: {error}", template.as_str()));
                    }
                    report.emails.push(log);
                }
            }
        }

        report
    }

    fn generate_pdf(
        &self,
        dossier: &Dossier,
        kind: PdfKind,
        values: &TemplateValues,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<Document, String> {
        let context = PdfContext {
            title: pdf_title(kind, dossier),
            fields: values.clone(),
        };
        let bytes = self
            .renderer
            .render(kind, &context)
            .map_err(|err| err.to_string())?;

        let id = DocumentId::new();
        let name = format!("{}-{}.pdf", kind.as_str(), dossier.reference);
        let key = storage_key(dossier.id, id, &name);
        let stored = self
            .storage
            .put(&key, mime::APPLICATION_PDF.essence_str(), &bytes)
            .map_err(|err| err.to_string())?;

        let document = Document {
            id,
            dossier_id: dossier.id,
            name: name.clone(),
            storage_key: stored.key,
            url: stored.url,
            kind: document_kind(kind),
            content_type: mime::APPLICATION_PDF.essence_str().to_string(),
            size_bytes: bytes.len() as u64,
            uploaded_by: actor,
            created_at: now,
        };
        let entry = HistoriqueEntry::new(dossier.id, actor, HistoriqueAction::DocumentAdded, now)
            .values(None, Some(name));
        self.store
            .insert_document(&document, &entry)
            .map_err(|err| err.to_string())?;

        info!(dossier = %dossier.reference, document = %document.id, pdf = kind.as_str(), "pdf generated");
        Ok(document)
    }
}
