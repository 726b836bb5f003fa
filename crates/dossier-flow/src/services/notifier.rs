use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::ports::{Mailer, OutgoingEmail};
use crate::domain::{DossierId, EmailId, EmailLog, EmailStatus};
use crate::repository::{RepositoryError, Store};
use crate::workflow::EmailTemplate;

/// Placeholder values available to templates, keyed by name without braces.
pub type TemplateValues = BTreeMap<String, String>;

fn template_text(template: EmailTemplate) -> (&'static str, &'static str) {
    match template {
        EmailTemplate::ConvocationBeneficiaire => (
            "Convocation - bilan de compétences {reference}",
            "Bonjour {beneficiaire},\n\n\
             Votre bilan de compétences (dossier {reference}) commence. \
             Votre consultant prendra contact avec vous pour fixer le premier entretien.\n\n\
             Cordialement,\n{entreprise}",
        ),
        EmailTemplate::SyntheseDisponible => (
            "Synthèse de votre bilan de compétences {reference}",
            "Bonjour {beneficiaire},\n\n\
             La synthèse de votre bilan de compétences est disponible. \
             Elle vous sera remise lors de l'entretien de restitution.\n\nCordialement",
        ),
        EmailTemplate::ValidationRequise => (
            "Dossier {reference} en attente de validation",
            "Bonjour,\n\n\
             Le dossier de formation de {beneficiaire} attend votre validation \
             avant transmission à l'OPCO.\n\nCordialement",
        ),
        EmailTemplate::DemandeOpco => (
            "Demande de prise en charge - {entreprise} - {reference}",
            "Bonjour,\n\n\
             Veuillez trouver ci-jointe la demande de prise en charge pour {beneficiaire}, \
             salarié(e) de {entreprise} (SIRET {siret}).\n\nCordialement",
        ),
        EmailTemplate::DecisionOpco => (
            "Décision de l'OPCO pour le dossier {reference}",
            "Bonjour,\n\n\
             L'OPCO a rendu sa décision pour le dossier de {beneficiaire} : {statut}.\n\
             {commentaire}\n\nCordialement",
        ),
        EmailTemplate::FactureEmise => (
            "Facture {facture} - dossier {reference}",
            "Bonjour,\n\n\
             La facture {facture} d'un montant de {montant_ttc} TTC a été émise \
             pour le dossier {reference}. Échéance : {echeance}.\n\nCordialement",
        ),
    }
}

/// Substitutes `{name}` placeholders. Unknown placeholders are left untouched.
pub fn render(text: &str, values: &TemplateValues) -> String {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('{') {
        output.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match values.get(name) {
                    Some(value) => output.push_str(value),
                    None => {
                        output.push('{');
                        output.push_str(name);
                        output.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                output.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    output.push_str(rest);
    output
}

/// Renders, sends and logs notification e-mails.
///
/// Delivery failures are recorded with status `failed` and never surface to the caller.
pub struct Notifier {
    mailer: Arc<dyn Mailer>,
    store: Arc<dyn Store>,
    from: String,
}

impl Notifier {
    pub fn new(mailer: Arc<dyn Mailer>, store: Arc<dyn Store>, from: impl Into<String>) -> Self {
        Self {
            mailer,
            store,
            from: from.into(),
        }
    }

    pub fn notify(
        &self,
        template: EmailTemplate,
        recipient: &str,
        dossier_id: Option<DossierId>,
        values: &TemplateValues,
        now: DateTime<Utc>,
    ) -> EmailLog {
        let (subject, body) = template_text(template);
        let email = OutgoingEmail {
            from: self.from.clone(),
            to: recipient.to_string(),
            subject: render(subject, values),
            body: render(body, values),
        };

        let (status, error) = match self.mailer.send(&email) {
            Ok(()) => {
                info!(template = template.as_str(), to = %email.to, "notification sent");
                (EmailStatus::Sent, None)
            }
            Err(err) => {
                warn!(template = template.as_str(), to = %email.to, error = %err, "notification failed");
                (EmailStatus::Failed, Some(err.to_string()))
            }
        };

        let log = EmailLog {
            id: EmailId::new(),
            dossier_id,
            recipient: email.to,
            template: template.as_str().to_string(),
            subject: email.subject,
            body: email.body,
            status,
            error,
            created_at: now,
        };
        if let Err(err) = self.store.insert_email(&log) {
            warn!(email = %log.id, error = %err, "could not record e-mail attempt");
        }
        log
    }

    pub fn history(&self, dossier_id: DossierId) -> Result<Vec<EmailLog>, RepositoryError> {
        self.store.list_emails(dossier_id)
    }
}
