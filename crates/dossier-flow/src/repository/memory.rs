use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    DocumentRepository, DossierFilter, DossierRepository, EmailLogRepository,
    EntrepriseRepository, FactureRepository, RefreshTokenRecord, RefreshTokenRepository,
    RepositoryError, SequenceRepository, SequenceScope, UserRepository,
};
use crate::domain::{
    Document, Dossier, DossierId, EmailLog, Entreprise, EntrepriseId, Facture, FactureId,
    HistoriqueEntry, RefreshTokenId, Siret, User, UserId,
};
use crate::workflow::DossierStatus;

#[derive(Default)]
struct MemoryState {
    users: HashMap<UserId, User>,
    entreprises: HashMap<EntrepriseId, Entreprise>,
    dossiers: HashMap<DossierId, Dossier>,
    history: Vec<HistoriqueEntry>,
    documents: Vec<Document>,
    factures: HashMap<FactureId, Facture>,
    emails: Vec<EmailLog>,
    refresh_tokens: HashMap<RefreshTokenId, RefreshTokenRecord>,
    sequences: HashMap<(SequenceScope, i32), u32>,
}

impl MemoryState {
    fn check_status(
        &self,
        id: DossierId,
        expected: DossierStatus,
    ) -> Result<(), RepositoryError> {
        match self.dossiers.get(&id) {
            Some(stored) if stored.status == expected => Ok(()),
            Some(_) => Err(RepositoryError::Stale),
            None => Err(RepositoryError::NotFound),
        }
    }
}

/// Process-local store used by tests and the demo server.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("memory store mutex poisoned".to_string()))
    }
}

impl UserRepository for MemoryStore {
    fn insert_user(&self, user: &User) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        if state.users.values().any(|existing| existing.email == user.email) {
            return Err(RepositoryError::Conflict(format!("user {}", user.email)));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    fn find_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let email = User::normalize_email(email);
        Ok(self
            .lock()?
            .users
            .values()
            .find(|user| user.email == email)
            .cloned())
    }
}

impl EntrepriseRepository for MemoryStore {
    fn insert_entreprise(&self, entreprise: &Entreprise) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        if state
            .entreprises
            .values()
            .any(|existing| existing.siret == entreprise.siret)
        {
            return Err(RepositoryError::Conflict(format!(
                "entreprise {}",
                entreprise.siret
            )));
        }
        state.entreprises.insert(entreprise.id, entreprise.clone());
        Ok(())
    }

    fn update_entreprise(&self, entreprise: &Entreprise) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        match state.entreprises.get_mut(&entreprise.id) {
            Some(stored) => {
                *stored = entreprise.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn find_entreprise(&self, id: EntrepriseId) -> Result<Option<Entreprise>, RepositoryError> {
        Ok(self.lock()?.entreprises.get(&id).cloned())
    }

    fn find_entreprise_by_siret(
        &self,
        siret: &Siret,
    ) -> Result<Option<Entreprise>, RepositoryError> {
        Ok(self
            .lock()?
            .entreprises
            .values()
            .find(|entreprise| &entreprise.siret == siret)
            .cloned())
    }

    fn list_entreprises(&self) -> Result<Vec<Entreprise>, RepositoryError> {
        let mut entreprises: Vec<_> = self.lock()?.entreprises.values().cloned().collect();
        entreprises.sort_by(|a, b| a.raison_sociale.cmp(&b.raison_sociale));
        Ok(entreprises)
    }
}

impl DossierRepository for MemoryStore {
    fn insert_dossier(
        &self,
        dossier: &Dossier,
        created: &HistoriqueEntry,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        if state.dossiers.contains_key(&dossier.id)
            || state
                .dossiers
                .values()
                .any(|existing| existing.reference == dossier.reference)
        {
            return Err(RepositoryError::Conflict(format!(
                "dossier {}",
                dossier.reference
            )));
        }
        state.dossiers.insert(dossier.id, dossier.clone());
        state.history.push(created.clone());
        Ok(())
    }

    fn update_dossier(
        &self,
        dossier: &Dossier,
        expected_status: DossierStatus,
        entry: &HistoriqueEntry,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        state.check_status(dossier.id, expected_status)?;
        state.dossiers.insert(dossier.id, dossier.clone());
        state.history.push(entry.clone());
        Ok(())
    }

    fn find_dossier(&self, id: DossierId) -> Result<Option<Dossier>, RepositoryError> {
        Ok(self.lock()?.dossiers.get(&id).cloned())
    }

    fn list_dossiers(&self, filter: &DossierFilter) -> Result<Vec<Dossier>, RepositoryError> {
        let mut dossiers: Vec<_> = self
            .lock()?
            .dossiers
            .values()
            .filter(|dossier| filter.matches(dossier))
            .cloned()
            .collect();
        dossiers.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.reference.cmp(&a.reference)));
        Ok(dossiers)
    }

    fn history(&self, id: DossierId) -> Result<Vec<HistoriqueEntry>, RepositoryError> {
        Ok(self
            .lock()?
            .history
            .iter()
            .filter(|entry| entry.dossier_id == id)
            .cloned()
            .collect())
    }
}

impl DocumentRepository for MemoryStore {
    fn insert_document(
        &self,
        document: &Document,
        entry: &HistoriqueEntry,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        if !state.dossiers.contains_key(&document.dossier_id) {
            return Err(RepositoryError::NotFound);
        }
        state.documents.push(document.clone());
        state.history.push(entry.clone());
        Ok(())
    }

    fn list_documents(&self, dossier_id: DossierId) -> Result<Vec<Document>, RepositoryError> {
        Ok(self
            .lock()?
            .documents
            .iter()
            .filter(|document| document.dossier_id == dossier_id)
            .cloned()
            .collect())
    }
}

impl FactureRepository for MemoryStore {
    fn insert_facture(
        &self,
        facture: &Facture,
        dossier: &Dossier,
        expected_status: DossierStatus,
        entry: &HistoriqueEntry,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        state.check_status(dossier.id, expected_status)?;
        if state
            .factures
            .values()
            .any(|existing| existing.number == facture.number)
        {
            return Err(RepositoryError::Conflict(format!("facture {}", facture.number)));
        }
        state.factures.insert(facture.id, facture.clone());
        state.dossiers.insert(dossier.id, dossier.clone());
        state.history.push(entry.clone());
        Ok(())
    }

    fn update_facture(
        &self,
        facture: &Facture,
        entry: &HistoriqueEntry,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        match state.factures.get_mut(&facture.id) {
            Some(stored) => *stored = facture.clone(),
            None => return Err(RepositoryError::NotFound),
        }
        state.history.push(entry.clone());
        Ok(())
    }

    fn find_facture(&self, id: FactureId) -> Result<Option<Facture>, RepositoryError> {
        Ok(self.lock()?.factures.get(&id).cloned())
    }

    fn list_factures(&self, dossier_id: DossierId) -> Result<Vec<Facture>, RepositoryError> {
        let mut factures: Vec<_> = self
            .lock()?
            .factures
            .values()
            .filter(|facture| facture.dossier_id == dossier_id)
            .cloned()
            .collect();
        factures.sort_by_key(|facture| facture.number);
        Ok(factures)
    }
}

impl EmailLogRepository for MemoryStore {
    fn insert_email(&self, email: &EmailLog) -> Result<(), RepositoryError> {
        self.lock()?.emails.push(email.clone());
        Ok(())
    }

    fn list_emails(&self, dossier_id: DossierId) -> Result<Vec<EmailLog>, RepositoryError> {
        Ok(self
            .lock()?
            .emails
            .iter()
            .filter(|email| email.dossier_id == Some(dossier_id))
            .cloned()
            .collect())
    }
}

impl RefreshTokenRepository for MemoryStore {
    fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), RepositoryError> {
        self.lock()?.refresh_tokens.insert(record.id, record.clone());
        Ok(())
    }

    fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, RepositoryError> {
        Ok(self
            .lock()?
            .refresh_tokens
            .values()
            .find(|record| record.token_hash == token_hash)
            .cloned())
    }

    fn rotate_refresh_token(
        &self,
        current: RefreshTokenId,
        replacement: &RefreshTokenRecord,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        let record = state
            .refresh_tokens
            .get_mut(&current)
            .ok_or(RepositoryError::NotFound)?;
        if record.revoked_at.is_some() {
            return Err(RepositoryError::Stale);
        }
        record.revoked_at = Some(at);
        record.replaced_by = Some(replacement.id);
        state
            .refresh_tokens
            .insert(replacement.id, replacement.clone());
        Ok(())
    }

    fn revoke_family(&self, family_id: Uuid, at: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let mut state = self.lock()?;
        let mut revoked = 0;
        for record in state
            .refresh_tokens
            .values_mut()
            .filter(|record| record.family_id == family_id && record.revoked_at.is_none())
        {
            record.revoked_at = Some(at);
            revoked += 1;
        }
        Ok(revoked)
    }
}

impl SequenceRepository for MemoryStore {
    fn next_sequence(&self, scope: SequenceScope, year: i32) -> Result<u32, RepositoryError> {
        let mut state = self.lock()?;
        let counter = state.sequences.entry((scope, year)).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}
