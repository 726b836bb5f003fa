use std::sync::Arc;

use chrono::{DateTime, Datelike, Days, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::dispatch::{DispatchReport, Dispatcher};
use super::{visible_dossier, ServiceError};
use crate::auth::Actor;
use crate::domain::{
    Dossier, DossierId, Facture, FactureError, FactureId, FactureNumber, FactureStatus,
    HistoriqueAction, HistoriqueEntry, MAX_PAYMENT_TERM_DAYS,
};
use crate::repository::{SequenceScope, Store};
use crate::workflow::{side_effects, validate_transition, DossierStatus};

pub const DEFAULT_PAYMENT_TERM_DAYS: u32 = 30;
const DEFAULT_VAT_RATE_BP: u32 = 2_000;

fn default_vat_rate() -> u32 {
    DEFAULT_VAT_RATE_BP
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueFacture {
    pub amount_ht_cents: i64,
    #[serde(default = "default_vat_rate")]
    pub vat_rate_bp: u32,
    #[serde(default)]
    pub due_in_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FactureOutcome {
    pub facture: Facture,
    pub dossier: Dossier,
    pub effects: DispatchReport,
}

/// `1234567` cents as `12345,67 €`.
fn euros(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    format!("{sign}{},{:02} €", cents / 100, cents % 100)
}

pub struct FactureService {
    store: Arc<dyn Store>,
    dispatcher: Arc<Dispatcher>,
}

impl FactureService {
    pub fn new(store: Arc<dyn Store>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { store, dispatcher }
    }

    fn require_billing_role(actor: &Actor) -> Result<(), ServiceError> {
        if actor.role.can_issue_factures() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!(
                "role {} may not manage invoices",
                actor.role
            )))
        }
    }

    /// Issues an invoice and closes the dossier in the same unit of work.
    ///
    /// Rejected when the dossier cannot move to `facture` from its current status, or when
    /// the amount, rate or payment term is out of range. No number is consumed then.
    pub fn issue(
        &self,
        dossier_id: DossierId,
        request: IssueFacture,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<FactureOutcome, ServiceError> {
        Self::require_billing_role(actor)?;
        Facture::validate_amounts(request.amount_ht_cents, request.vat_rate_bp)?;
        let term = request.due_in_days.unwrap_or(DEFAULT_PAYMENT_TERM_DAYS);
        let due_date = Some(term)
            .filter(|days| *days <= MAX_PAYMENT_TERM_DAYS)
            .and_then(|days| now.date_naive().checked_add_days(Days::new(u64::from(days))))
            .ok_or(FactureError::PaymentTermTooLong(term))?;

        let dossier = visible_dossier(self.store.as_ref(), dossier_id, actor)?;
        let transition = validate_transition(
            dossier.kind,
            dossier.status,
            DossierStatus::Facture,
            actor.role,
            None,
        )?;

        let year = now.year();
        let number = FactureNumber {
            year,
            sequence: self.store.next_sequence(SequenceScope::Facture, year)?,
        };
        let facture = Facture {
            id: FactureId::new(),
            dossier_id: dossier.id,
            number,
            amount_ht_cents: request.amount_ht_cents,
            vat_rate_bp: request.vat_rate_bp,
            due_date,
            status: FactureStatus::Emise,
            issued_at: now,
            paid_at: None,
        };

        let updated = Dossier {
            status: DossierStatus::Facture,
            updated_at: now,
            ..dossier.clone()
        };
        let entry = HistoriqueEntry::new(dossier.id, actor.user_id, HistoriqueAction::StatusChange, now)
            .values(
                Some(transition.from.as_str().to_string()),
                Some(transition.to.as_str().to_string()),
            )
            .comment(Some(format!("Facture {number} émise")));
        self.store
            .insert_facture(&facture, &updated, dossier.status, &entry)?;

        info!(
            dossier = %updated.reference,
            facture = %facture.number,
            amount_ht_cents = facture.amount_ht_cents,
            actor = %actor.user_id,
            "facture issued"
        );

        let (context, mut values) = self.dispatcher.context(&updated)?;
        values.insert("facture".to_string(), facture.number.to_string());
        values.insert("montant_ht".to_string(), euros(facture.amount_ht_cents));
        values.insert("montant_ttc".to_string(), euros(facture.amount_ttc_cents()));
        values.insert(
            "echeance".to_string(),
            facture.due_date.format("%d/%m/%Y").to_string(),
        );
        let effects = side_effects(&transition, &context);
        let report = self
            .dispatcher
            .dispatch(&updated, &effects, &values, actor.user_id, now);

        Ok(FactureOutcome {
            facture,
            dossier: updated,
            effects: report,
        })
    }

    pub fn mark_paid(
        &self,
        id: FactureId,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Facture, ServiceError> {
        self.change(id, actor, now, |facture| facture.mark_paid(now))
    }

    pub fn cancel(
        &self,
        id: FactureId,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Facture, ServiceError> {
        self.change(id, actor, now, Facture::cancel)
    }

    pub fn list(&self, dossier_id: DossierId, actor: &Actor) -> Result<Vec<Facture>, ServiceError> {
        let dossier = visible_dossier(self.store.as_ref(), dossier_id, actor)?;
        Ok(self.store.list_factures(dossier.id)?)
    }

    fn change(
        &self,
        id: FactureId,
        actor: &Actor,
        now: DateTime<Utc>,
        apply: impl FnOnce(&mut Facture) -> Result<(), FactureError>,
    ) -> Result<Facture, ServiceError> {
        Self::require_billing_role(actor)?;
        let mut facture = self
            .store
            .find_facture(id)?
            .ok_or(ServiceError::NotFound("facture"))?;
        let previous = facture.status;
        apply(&mut facture)?;

        let entry = HistoriqueEntry::new(
            facture.dossier_id,
            actor.user_id,
            HistoriqueAction::FactureUpdate,
            now,
        )
        .values(
            Some(previous.as_str().to_string()),
            Some(facture.status.as_str().to_string()),
        )
        .comment(Some(format!("Facture {}", facture.number)));
        self.store.update_facture(&facture, &entry)?;

        info!(facture = %facture.number, status = facture.status.as_str(), "facture updated");
        Ok(facture)
    }
}
