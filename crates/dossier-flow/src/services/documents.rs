use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use super::ports::BlobStorage;
use super::{editable_dossier, visible_dossier, ServiceError};
use crate::auth::Actor;
use crate::domain::{
    Document, DocumentId, DocumentKind, DossierId, HistoriqueAction, HistoriqueEntry,
};
use crate::repository::Store;

/// Object key under which a dossier file is stored.
pub(crate) fn storage_key(dossier_id: DossierId, document_id: DocumentId, name: &str) -> String {
    format!("dossiers/{dossier_id}/{document_id}-{name}")
}

/// Final path segment with characters that are unsafe in object keys replaced.
fn sanitize_name(raw: &str) -> String {
    let base = raw
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();
    base.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub dossier_id: DossierId,
    pub name: String,
    pub kind: DocumentKind,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

pub struct DocumentService {
    store: Arc<dyn Store>,
    storage: Arc<dyn BlobStorage>,
    max_bytes: usize,
}

impl DocumentService {
    pub fn new(store: Arc<dyn Store>, storage: Arc<dyn BlobStorage>, max_bytes: usize) -> Self {
        Self {
            store,
            storage,
            max_bytes,
        }
    }

    /// Uploads the file, then records it. Nothing is recorded when the upload fails.
    pub fn upload(
        &self,
        request: UploadRequest,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Document, ServiceError> {
        let dossier = editable_dossier(self.store.as_ref(), request.dossier_id, actor)?;

        let name = sanitize_name(&request.name);
        if name.is_empty() || name.chars().all(|c| c == '.') {
            return Err(ServiceError::Validation("file name is required".to_string()));
        }
        if request.bytes.is_empty() {
            return Err(ServiceError::Validation("file is empty".to_string()));
        }
        if request.bytes.len() > self.max_bytes {
            return Err(ServiceError::Validation(format!(
                "file is {} bytes, the limit is {}",
                request.bytes.len(),
                self.max_bytes
            )));
        }

        let content_type = match request
            .content_type
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            Some(declared) => declared
                .parse::<mime::Mime>()
                .map_err(|_| ServiceError::Validation(format!("invalid content type {declared}")))?,
            None => mime_guess::from_path(&name).first_or_octet_stream(),
        };

        let id = DocumentId::new();
        let key = storage_key(dossier.id, id, &name);
        let stored = self
            .storage
            .put(&key, content_type.essence_str(), &request.bytes)?;

        let document = Document {
            id,
            dossier_id: dossier.id,
            name: name.clone(),
            storage_key: stored.key,
            url: stored.url,
            kind: request.kind,
            content_type: content_type.essence_str().to_string(),
            size_bytes: request.bytes.len() as u64,
            uploaded_by: actor.user_id,
            created_at: now,
        };
        let entry = HistoriqueEntry::new(dossier.id, actor.user_id, HistoriqueAction::DocumentAdded, now)
            .values(None, Some(name));
        self.store.insert_document(&document, &entry)?;

        info!(
            dossier = %dossier.reference,
            document = %document.id,
            kind = document.kind.as_str(),
            size = document.size_bytes,
            "document uploaded"
        );
        Ok(document)
    }

    pub fn list(&self, dossier_id: DossierId, actor: &Actor) -> Result<Vec<Document>, ServiceError> {
        let dossier = visible_dossier(self.store.as_ref(), dossier_id, actor)?;
        Ok(self.store.list_documents(dossier.id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_lose_directories_and_odd_characters() {
        assert_eq!(sanitize_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_name("C:\\scans\\feuille*1.pdf"), "feuille_1.pdf");
        assert_eq!(sanitize_name("Convention signée.pdf"), "Convention signée.pdf");
    }

    #[test]
    fn storage_keys_are_scoped_by_dossier() {
        let dossier = DossierId::new();
        let document = DocumentId::new();
        let key = storage_key(dossier, document, "a.pdf");
        assert!(key.starts_with(&format!("dossiers/{dossier}/")));
        assert!(key.ends_with("-a.pdf"));
    }
}
