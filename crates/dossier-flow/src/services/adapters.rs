//! In-process implementations of the external ports, used by the API server and tests.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::{debug, info};

use super::ports::{
    BlobStorage, CompanyRecord, CompanyRegistry, GatewayError, Mailer, OutgoingEmail,
    PdfContext, PdfRenderer, StoredBlob,
};
use crate::domain::Siret;
use crate::workflow::PdfKind;

fn poisoned(service: &'static str) -> GatewayError {
    GatewayError::Unavailable {
        service,
        reason: "mutex poisoned".to_string(),
    }
}

/// Registry backed by a fixed table of establishments.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    records: HashMap<Siret, CompanyRecord>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(mut self, siret: Siret, record: CompanyRecord) -> Self {
        self.records.insert(siret, record);
        self
    }
}

impl CompanyRegistry for StaticRegistry {
    fn lookup(&self, siret: &Siret) -> Result<Option<CompanyRecord>, GatewayError> {
        Ok(self.records.get(siret).cloned())
    }
}

/// Mailer that keeps every message in memory instead of delivering it.
#[derive(Debug, Default)]
pub struct OutboxMailer {
    outbox: Mutex<Vec<OutgoingEmail>>,
    failing: AtomicBool,
}

impl OutboxMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent sends fail, to exercise delivery error paths.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.outbox
            .lock()
            .map(|outbox| outbox.clone())
            .unwrap_or_default()
    }
}

impl Mailer for OutboxMailer {
    fn send(&self, email: &OutgoingEmail) -> Result<(), GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable {
                service: "mailer",
                reason: "delivery provider offline".to_string(),
            });
        }
        self.outbox
            .lock()
            .map_err(|_| poisoned("mailer"))?
            .push(email.clone());
        info!(to = %email.to, subject = %email.subject, "e-mail queued in outbox");
        Ok(())
    }
}

/// Object storage held in a map keyed by storage key.
#[derive(Debug, Default)]
pub struct MemoryBlobStorage {
    objects: Mutex<HashMap<String, (String, Vec<u8>)>>,
    failing: AtomicBool,
}

impl MemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn get(&self, key: &str) -> Option<(String, Vec<u8>)> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(key).cloned())
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStorage for MemoryBlobStorage {
    fn put(&self, key: &str, content_type: &str, bytes: &[u8]) -> Result<StoredBlob, GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable {
                service: "blob storage",
                reason: "bucket unreachable".to_string(),
            });
        }
        self.objects
            .lock()
            .map_err(|_| poisoned("blob storage"))?
            .insert(key.to_string(), (content_type.to_string(), bytes.to_vec()));
        debug!(key, size = bytes.len(), "object stored");
        Ok(StoredBlob {
            key: key.to_string(),
            url: Some(format!("memory://{key}")),
        })
    }
}

/// Renders a single-page PDF listing the context fields as text lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextPdfRenderer;

fn escape(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control())
        .flat_map(|c| match c {
            '(' | ')' | '\\' => vec!['\\', c],
            _ => vec![c],
        })
        .collect()
}

impl PdfRenderer for TextPdfRenderer {
    fn render(&self, kind: PdfKind, context: &PdfContext) -> Result<Vec<u8>, GatewayError> {
        let mut stream = String::from("BT /F1 12 Tf 50 800 Td 16 TL\n");
        let _ = writeln!(stream, "({}) Tj T*", escape(&context.title));
        let _ = writeln!(stream, "(Document: {}) Tj T*", kind.as_str());
        for (key, value) in &context.fields {
            let _ = writeln!(stream, "({}: {}) Tj T*", escape(key), escape(value));
        }
        stream.push_str("ET\n");

        let objects = [
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 595 842] \
             /Resources << /Font << /F1 5 0 R >> >> /Contents 4 0 R >>"
                .to_string(),
            format!("<< /Length {} >>\nstream\n{stream}endstream", stream.len()),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
        ];

        let mut pdf = String::from("%PDF-1.4\n");
        let mut offsets = Vec::with_capacity(objects.len());
        for (index, body) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            let _ = write!(pdf, "{} 0 obj\n{body}\nendobj\n", index + 1);
        }
        let xref = pdf.len();
        let _ = write!(pdf, "xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
        for offset in offsets {
            let _ = write!(pdf, "{offset:010} 00000 n \n");
        }
        let _ = write!(
            pdf,
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref}\n%%EOF\n",
            objects.len() + 1
        );

        Ok(pdf.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_pdf_has_header_and_trailer() {
        let mut context = PdfContext {
            title: "Facture FAC-2025-0001".to_string(),
            ..PdfContext::default()
        };
        context
            .fields
            .insert("Montant".to_string(), "1200,00 (HT)".to_string());

        let bytes = TextPdfRenderer
            .render(PdfKind::Facture, &context)
            .expect("render succeeds");
        let text = String::from_utf8(bytes).expect("ascii output");
        assert!(text.starts_with("%PDF-1.4"));
        assert!(text.trim_end().ends_with("%%EOF"));
        assert!(text.contains("Montant: 1200,00 \\(HT\\)"));
    }

    #[test]
    fn failing_storage_keeps_nothing() {
        let storage = MemoryBlobStorage::new();
        storage.set_failing(true);
        assert!(storage.put("a/b.pdf", "application/pdf", b"%PDF").is_err());
        assert!(storage.is_empty());

        storage.set_failing(false);
        let stored = storage
            .put("a/b.pdf", "application/pdf", b"%PDF")
            .expect("stored");
        assert_eq!(stored.url.as_deref(), Some("memory://a/b.pdf"));
        assert_eq!(storage.len(), 1);
    }
}
