//! JSON API under `/api/v1`, one handler module per resource.

mod auth;
mod dossiers;
mod entreprises;
mod factures;

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use axum::Router;
use chrono::Utc;

use crate::auth::{Actor, AuthService};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::repository::Store;
use crate::services::adapters::{MemoryBlobStorage, OutboxMailer, StaticRegistry, TextPdfRenderer};
use crate::services::{
    BlobStorage, CompanyRegistry, Dispatcher, DocumentService, DossierService,
    EntrepriseService, FactureService, Mailer, Notifier, PdfRenderer,
};

/// External collaborators injected into the services.
#[derive(Clone)]
pub struct Gateways {
    pub registry: Arc<dyn CompanyRegistry>,
    pub mailer: Arc<dyn Mailer>,
    pub storage: Arc<dyn BlobStorage>,
    pub renderer: Arc<dyn PdfRenderer>,
}

impl Gateways {
    /// Process-local collaborators: empty registry, outbox mailer, memory storage.
    pub fn in_process() -> Self {
        Self {
            registry: Arc::new(StaticRegistry::new()),
            mailer: Arc::new(OutboxMailer::new()),
            storage: Arc::new(MemoryBlobStorage::new()),
            renderer: Arc::new(TextPdfRenderer),
        }
    }
}

/// Shared state behind every handler.
pub struct AppServices {
    pub auth: AuthService,
    pub entreprises: EntrepriseService,
    pub dossiers: DossierService,
    pub documents: DocumentService,
    pub factures: FactureService,
    upload_limit: usize,
}

impl AppServices {
    pub fn new(store: Arc<dyn Store>, gateways: Gateways, config: &AppConfig) -> Self {
        let notifier = Notifier::new(gateways.mailer, store.clone(), config.mail.from.clone());
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            notifier,
            gateways.storage.clone(),
            gateways.renderer,
        ));

        Self {
            auth: AuthService::new(store.clone(), &config.auth),
            entreprises: EntrepriseService::new(store.clone(), gateways.registry),
            dossiers: DossierService::new(store.clone(), dispatcher.clone()),
            documents: DocumentService::new(
                store.clone(),
                gateways.storage,
                config.uploads.max_bytes,
            ),
            factures: FactureService::new(store, dispatcher),
            upload_limit: config.uploads.max_bytes,
        }
    }

    pub(crate) fn actor(&self, headers: &HeaderMap) -> Result<Actor, AppError> {
        Ok(self.auth.authenticate(headers, Utc::now())?)
    }
}

pub(crate) fn parse_id<T: FromStr>(raw: &str, what: &str) -> Result<T, AppError> {
    raw.parse()
        .map_err(|_| AppError::bad_request(format!("invalid {what} id: {raw}")))
}

pub type SharedServices = Arc<AppServices>;

/// Router for every `/api/v1` endpoint.
pub fn api_router(services: SharedServices) -> Router {
    // Room for the request framing on top of the largest accepted file.
    let body_limit = services.upload_limit.saturating_add(64 * 1024);

    Router::new()
        .route("/api/v1/auth/login", post(auth::login))
        .route("/api/v1/auth/refresh", post(auth::refresh))
        .route("/api/v1/auth/logout", post(auth::logout))
        .route("/api/v1/auth/me", get(auth::me))
        .route(
            "/api/v1/entreprises",
            get(entreprises::list).post(entreprises::register),
        )
        .route("/api/v1/entreprises/:id", get(entreprises::show))
        .route("/api/v1/entreprises/:id/opco", put(entreprises::assign_opco))
        .route(
            "/api/v1/dossiers",
            get(dossiers::list).post(dossiers::create),
        )
        .route("/api/v1/dossiers/export.csv", get(dossiers::export_csv))
        .route("/api/v1/dossiers/:id", get(dossiers::show))
        .route("/api/v1/dossiers/:id/transitions", post(dossiers::transition))
        .route("/api/v1/dossiers/:id/hours", put(dossiers::record_hours))
        .route("/api/v1/dossiers/:id/notes", put(dossiers::update_notes))
        .route("/api/v1/dossiers/:id/historique", get(dossiers::history))
        .route("/api/v1/dossiers/:id/emails", get(dossiers::emails))
        .route(
            "/api/v1/dossiers/:id/documents",
            get(dossiers::list_documents)
                .post(dossiers::upload_document)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .route(
            "/api/v1/dossiers/:id/factures",
            get(factures::list).post(factures::issue),
        )
        .route("/api/v1/factures/:id/paid", post(factures::mark_paid))
        .route("/api/v1/factures/:id/cancel", post(factures::cancel))
        .with_state(services)
}
