use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::dispatch::{DispatchReport, Dispatcher};
use super::{editable_dossier, visible_dossier, ServiceError};
use crate::auth::Actor;
use crate::domain::{
    Beneficiary, Dossier, DossierError, DossierId, EmailLog, EntrepriseId, HistoriqueAction,
    HistoriqueEntry, Role, UserId,
};
use crate::repository::{DossierFilter, SequenceScope, Store};
use crate::workflow::{
    side_effects, validate_transition, DossierKind, DossierStatus, Transition, WorkflowError,
};

pub const CSV_HEADERS: [&str; 13] = [
    "reference",
    "type",
    "statut",
    "entreprise",
    "siret",
    "beneficiaire",
    "email_beneficiaire",
    "heures_prevues",
    "heures_realisees",
    "date_debut",
    "date_fin",
    "cree_le",
    "mis_a_jour_le",
];

#[derive(Debug, Clone, Deserialize)]
pub struct NewDossier {
    pub kind: DossierKind,
    pub entreprise_id: EntrepriseId,
    pub beneficiary: Beneficiary,
    #[serde(default)]
    pub consultant_id: Option<UserId>,
    #[serde(default)]
    pub hours_planned: u32,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub dossier: Dossier,
    pub transition: Transition,
    pub effects: DispatchReport,
}

pub struct DossierService {
    store: Arc<dyn Store>,
    dispatcher: Arc<Dispatcher>,
}

fn date_cell(date: Option<NaiveDate>) -> String {
    date.map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

impl DossierService {
    pub fn new(store: Arc<dyn Store>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { store, dispatcher }
    }

    pub fn create(
        &self,
        request: NewDossier,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Dossier, ServiceError> {
        if !actor.role.can_create_dossiers() {
            return Err(ServiceError::Forbidden(format!(
                "role {} may not create dossiers",
                actor.role
            )));
        }
        if actor.role == Role::Rh && actor.entreprise_id != Some(request.entreprise_id) {
            return Err(ServiceError::Forbidden(
                "dossiers can only be opened for your own company".to_string(),
            ));
        }

        let beneficiary = Beneficiary {
            first_name: request.beneficiary.first_name.trim().to_string(),
            last_name: request.beneficiary.last_name.trim().to_string(),
            email: request
                .beneficiary
                .email
                .map(|email| email.trim().to_string())
                .filter(|email| !email.is_empty()),
        };
        if beneficiary.first_name.is_empty() || beneficiary.last_name.is_empty() {
            return Err(DossierError::MissingBeneficiary.into());
        }
        Dossier::validate_schedule(request.start_date, request.end_date)?;
        Dossier::validate_hours(request.kind, request.hours_planned, 0)?;

        let entreprise = self
            .store
            .find_entreprise(request.entreprise_id)?
            .ok_or(ServiceError::NotFound("entreprise"))?;

        let consultant_id = match (request.consultant_id, actor.role) {
            (Some(id), _) => {
                let consultant = self
                    .store
                    .find_user(id)?
                    .ok_or(ServiceError::NotFound("consultant"))?;
                if !matches!(consultant.role, Role::Consultant | Role::Admin) {
                    return Err(ServiceError::Validation(format!(
                        "user {} is not a consultant",
                        consultant.email
                    )));
                }
                Some(id)
            }
            (None, Role::Consultant) => Some(actor.user_id),
            (None, _) => None,
        };

        let sequence = self.store.next_sequence(SequenceScope::Dossier, now.year())?;
        let status = request.kind.initial_status();
        let dossier = Dossier {
            id: DossierId::new(),
            reference: Dossier::reference_for(now.year(), sequence),
            kind: request.kind,
            status,
            entreprise_id: entreprise.id,
            beneficiary,
            consultant_id,
            hours_planned: request.hours_planned,
            hours_completed: 0,
            start_date: request.start_date,
            end_date: request.end_date,
            notes: request.notes.trim().to_string(),
            created_at: now,
            updated_at: now,
        };
        let entry = HistoriqueEntry::new(dossier.id, actor.user_id, HistoriqueAction::Created, now)
            .values(None, Some(status.as_str().to_string()));
        self.store.insert_dossier(&dossier, &entry)?;

        info!(
            dossier = %dossier.reference,
            kind = dossier.kind.as_str(),
            entreprise = %entreprise.siret,
            actor = %actor.user_id,
            "dossier created"
        );
        Ok(dossier)
    }

    pub fn get(&self, id: DossierId, actor: &Actor) -> Result<Dossier, ServiceError> {
        visible_dossier(self.store.as_ref(), id, actor)
    }

    /// Dossiers matching `filter` that the actor may see, newest first.
    pub fn list(&self, filter: &DossierFilter, actor: &Actor) -> Result<Vec<Dossier>, ServiceError> {
        let mut dossiers = self.store.list_dossiers(filter)?;
        dossiers.retain(|dossier| actor.can_view_dossier(dossier));
        Ok(dossiers)
    }

    /// Validates and persists a status change, then dispatches its side effects.
    /// `facture` is reached through [`super::FactureService::issue`] only.
    pub fn transition(
        &self,
        id: DossierId,
        to: DossierStatus,
        comment: Option<String>,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, ServiceError> {
        let dossier = visible_dossier(self.store.as_ref(), id, actor)?;
        let transition = validate_transition(
            dossier.kind,
            dossier.status,
            to,
            actor.role,
            comment.as_deref(),
        )?;
        if transition.to == DossierStatus::Facture {
            return Err(WorkflowError::InvoiceRequired(transition.to).into());
        }

        let updated = Dossier {
            status: to,
            updated_at: now,
            ..dossier.clone()
        };
        let entry = HistoriqueEntry::new(dossier.id, actor.user_id, HistoriqueAction::StatusChange, now)
            .values(
                Some(transition.from.as_str().to_string()),
                Some(transition.to.as_str().to_string()),
            )
            .comment(comment.clone());
        self.store.update_dossier(&updated, dossier.status, &entry)?;

        info!(
            dossier = %updated.reference,
            from = transition.from.as_str(),
            to = transition.to.as_str(),
            actor = %actor.user_id,
            role = %actor.role,
            "dossier status changed"
        );

        let (context, mut values) = self.dispatcher.context(&updated)?;
        if let Some(comment) = comment {
            values.insert("commentaire".to_string(), comment);
        }
        let effects = side_effects(&transition, &context);
        let report = self
            .dispatcher
            .dispatch(&updated, &effects, &values, actor.user_id, now);

        Ok(TransitionOutcome {
            dossier: updated,
            transition,
            effects: report,
        })
    }

    /// Updates the hour counters. `planned` keeps the current value when absent.
    pub fn record_hours(
        &self,
        id: DossierId,
        planned: Option<u32>,
        completed: u32,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Dossier, ServiceError> {
        let dossier = editable_dossier(self.store.as_ref(), id, actor)?;
        if dossier.status.is_terminal() {
            return Err(DossierError::Closed(dossier.status).into());
        }

        let planned = planned.unwrap_or(dossier.hours_planned);
        Dossier::validate_hours(dossier.kind, planned, completed)?;

        let updated = Dossier {
            hours_planned: planned,
            hours_completed: completed,
            updated_at: now,
            ..dossier.clone()
        };
        let entry = HistoriqueEntry::new(dossier.id, actor.user_id, HistoriqueAction::HoursUpdate, now)
            .values(Some(dossier.hours_summary()), Some(updated.hours_summary()));
        self.store.update_dossier(&updated, dossier.status, &entry)?;

        info!(dossier = %updated.reference, hours = %updated.hours_summary(), "hours recorded");
        Ok(updated)
    }

    pub fn update_notes(
        &self,
        id: DossierId,
        notes: &str,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Dossier, ServiceError> {
        let dossier = editable_dossier(self.store.as_ref(), id, actor)?;
        let notes = notes.trim();
        if dossier.notes == notes {
            return Ok(dossier);
        }

        let updated = Dossier {
            notes: notes.to_string(),
            updated_at: now,
            ..dossier.clone()
        };
        let entry = HistoriqueEntry::new(dossier.id, actor.user_id, HistoriqueAction::NoteUpdate, now)
            .values(
                Some(dossier.notes.clone()).filter(|old| !old.is_empty()),
                Some(updated.notes.clone()).filter(|new| !new.is_empty()),
            );
        self.store.update_dossier(&updated, dossier.status, &entry)?;
        Ok(updated)
    }

    pub fn history(&self, id: DossierId, actor: &Actor) -> Result<Vec<HistoriqueEntry>, ServiceError> {
        let dossier = visible_dossier(self.store.as_ref(), id, actor)?;
        Ok(self.store.history(dossier.id)?)
    }

    pub fn emails(&self, id: DossierId, actor: &Actor) -> Result<Vec<EmailLog>, ServiceError> {
        let dossier = visible_dossier(self.store.as_ref(), id, actor)?;
        Ok(self.dispatcher.notifier().history(dossier.id)?)
    }

    /// CSV export (comma separated, header row first) of the visible dossiers.
    pub fn export_csv(&self, filter: &DossierFilter, actor: &Actor) -> Result<String, ServiceError> {
        let dossiers = self.list(filter, actor)?;
        let entreprises: HashMap<_, _> = self
            .store
            .list_entreprises()?
            .into_iter()
            .map(|entreprise| (entreprise.id, entreprise))
            .collect();

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(CSV_HEADERS)
            .map_err(|err| ServiceError::Export(err.to_string()))?;
        for dossier in &dossiers {
            let entreprise = entreprises.get(&dossier.entreprise_id);
            writer
                .write_record([
                    dossier.reference.clone(),
                    dossier.kind.as_str().to_string(),
                    dossier.status.as_str().to_string(),
                    entreprise
                        .map(|entreprise| entreprise.raison_sociale.clone())
                        .unwrap_or_default(),
                    entreprise
                        .map(|entreprise| entreprise.siret.to_string())
                        .unwrap_or_default(),
                    dossier.beneficiary.full_name(),
                    dossier.beneficiary.email.clone().unwrap_or_default(),
                    dossier.hours_planned.to_string(),
                    dossier.hours_completed.to_string(),
                    date_cell(dossier.start_date),
                    date_cell(dossier.end_date),
                    dossier.created_at.to_rfc3339(),
                    dossier.updated_at.to_rfc3339(),
                ])
                .map_err(|err| ServiceError::Export(err.to_string()))?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|err| ServiceError::Export(err.to_string()))?;
        let csv = String::from_utf8(bytes).map_err(|err| ServiceError::Export(err.to_string()))?;

        info!(rows = dossiers.len(), actor = %actor.user_id, "dossiers exported");
        Ok(csv)
    }
}
