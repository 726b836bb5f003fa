use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use super::ports::{CompanyRecord, CompanyRegistry};
use super::ServiceError;
use crate::auth::Actor;
use crate::domain::{EnrichmentSource, Entreprise, EntrepriseId, OpcoContact, Siret};
use crate::repository::{RepositoryError, Store};

/// Registration payload. Manual fields are used when the registry has no record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterEntreprise {
    pub siret: String,
    #[serde(default)]
    pub raison_sociale: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub naf_code: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub opco: Option<OpcoContact>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

fn clean_opco(opco: Option<OpcoContact>) -> Result<Option<OpcoContact>, ServiceError> {
    match opco {
        None => Ok(None),
        Some(opco) if opco.name.trim().is_empty() => {
            Err(ServiceError::Validation("OPCO name is required".to_string()))
        }
        Some(opco) => Ok(Some(OpcoContact {
            name: opco.name.trim().to_string(),
            email: non_blank(opco.email),
        })),
    }
}

pub struct EntrepriseService {
    store: Arc<dyn Store>,
    registry: Arc<dyn CompanyRegistry>,
}

impl EntrepriseService {
    pub fn new(store: Arc<dyn Store>, registry: Arc<dyn CompanyRegistry>) -> Self {
        Self { store, registry }
    }

    /// Registers a company, enriching it from the registry when possible.
    pub fn register(
        &self,
        request: RegisterEntreprise,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Entreprise, ServiceError> {
        if !actor.role.can_manage_entreprises() {
            return Err(ServiceError::Forbidden(format!(
                "role {} may not register companies",
                actor.role
            )));
        }

        let siret = Siret::parse(&request.siret)?;
        if self.store.find_entreprise_by_siret(&siret)?.is_some() {
            return Err(RepositoryError::Conflict(format!("entreprise {siret}")).into());
        }

        let manual_opco = clean_opco(request.opco)?;
        let looked_up = match self.registry.lookup(&siret) {
            Ok(record) => record,
            Err(err) => {
                warn!(%siret, error = %err, "registry lookup failed, using manual data");
                None
            }
        };

        let entreprise = match looked_up {
            Some(CompanyRecord {
                raison_sociale,
                address,
                naf_code,
                contact_email,
                opco,
            }) => Entreprise {
                id: EntrepriseId::new(),
                siret,
                raison_sociale,
                address: non_blank(request.address).or(address),
                naf_code: naf_code.or(non_blank(request.naf_code)),
                contact_email: non_blank(request.contact_email).or(contact_email),
                opco: manual_opco.or(opco),
                source: EnrichmentSource::Registry,
                created_at: now,
            },
            None => {
                let raison_sociale = non_blank(request.raison_sociale).ok_or_else(|| {
                    ServiceError::Validation(
                        "raison sociale is required when the registry has no record".to_string(),
                    )
                })?;
                Entreprise {
                    id: EntrepriseId::new(),
                    siret,
                    raison_sociale,
                    address: non_blank(request.address),
                    naf_code: non_blank(request.naf_code),
                    contact_email: non_blank(request.contact_email),
                    opco: manual_opco,
                    source: EnrichmentSource::Manual,
                    created_at: now,
                }
            }
        };

        self.store.insert_entreprise(&entreprise)?;
        info!(
            entreprise = %entreprise.id,
            siret = %entreprise.siret,
            source = entreprise.source.as_str(),
            "entreprise registered"
        );
        Ok(entreprise)
    }

    pub fn get(&self, id: EntrepriseId, actor: &Actor) -> Result<Entreprise, ServiceError> {
        let entreprise = self
            .store
            .find_entreprise(id)?
            .ok_or(ServiceError::NotFound("entreprise"))?;
        if !actor.can_view_entreprise(id) {
            return Err(ServiceError::Forbidden(
                "entreprise is not accessible".to_string(),
            ));
        }
        Ok(entreprise)
    }

    pub fn list(&self, actor: &Actor) -> Result<Vec<Entreprise>, ServiceError> {
        let mut entreprises = self.store.list_entreprises()?;
        entreprises.retain(|entreprise| actor.can_view_entreprise(entreprise.id));
        Ok(entreprises)
    }

    /// Links (or replaces) the funding body of a company.
    pub fn assign_opco(
        &self,
        id: EntrepriseId,
        opco: OpcoContact,
        actor: &Actor,
    ) -> Result<Entreprise, ServiceError> {
        if !actor.role.can_manage_entreprises() {
            return Err(ServiceError::Forbidden(format!(
                "role {} may not change OPCO links",
                actor.role
            )));
        }
        let mut entreprise = self
            .store
            .find_entreprise(id)?
            .ok_or(ServiceError::NotFound("entreprise"))?;
        entreprise.opco = clean_opco(Some(opco))?;
        self.store.update_entreprise(&entreprise)?;
        info!(entreprise = %entreprise.id, opco = ?entreprise.opco.as_ref().map(|o| &o.name), "opco assigned");
        Ok(entreprise)
    }
}
