use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use super::{parse_id, SharedServices};
use crate::domain::{DocumentKind, DossierId};
use crate::error::AppError;
use crate::repository::DossierFilter;
use crate::services::{NewDossier, UploadRequest};
use crate::workflow::DossierStatus;

#[derive(Debug, Deserialize)]
pub(crate) struct TransitionRequest {
    to: DossierStatus,
    #[serde(default)]
    comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HoursRequest {
    #[serde(default)]
    hours_planned: Option<u32>,
    hours_completed: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NotesRequest {
    notes: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UploadParams {
    name: String,
    #[serde(default)]
    kind: Option<String>,
}

pub(crate) async fn list(
    State(services): State<SharedServices>,
    headers: HeaderMap,
    Query(filter): Query<DossierFilter>,
) -> Result<impl IntoResponse, AppError> {
    let actor = services.actor(&headers)?;
    Ok(Json(services.dossiers.list(&filter, &actor)?))
}

pub(crate) async fn create(
    State(services): State<SharedServices>,
    headers: HeaderMap,
    Json(request): Json<NewDossier>,
) -> Result<impl IntoResponse, AppError> {
    let actor = services.actor(&headers)?;
    let dossier = services.dossiers.create(request, &actor, Utc::now())?;
    Ok((StatusCode::CREATED, Json(dossier)))
}

pub(crate) async fn show(
    State(services): State<SharedServices>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let actor = services.actor(&headers)?;
    let id: DossierId = parse_id(&id, "dossier")?;
    Ok(Json(services.dossiers.get(id, &actor)?))
}

pub(crate) async fn transition(
    State(services): State<SharedServices>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<TransitionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let actor = services.actor(&headers)?;
    let id: DossierId = parse_id(&id, "dossier")?;
    let outcome =
        services
            .dossiers
            .transition(id, request.to, request.comment, &actor, Utc::now())?;
    Ok(Json(outcome))
}

pub(crate) async fn record_hours(
    State(services): State<SharedServices>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<HoursRequest>,
) -> Result<impl IntoResponse, AppError> {
    let actor = services.actor(&headers)?;
    let id: DossierId = parse_id(&id, "dossier")?;
    let dossier = services.dossiers.record_hours(
        id,
        request.hours_planned,
        request.hours_completed,
        &actor,
        Utc::now(),
    )?;
    Ok(Json(dossier))
}

pub(crate) async fn update_notes(
    State(services): State<SharedServices>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<NotesRequest>,
) -> Result<impl IntoResponse, AppError> {
    let actor = services.actor(&headers)?;
    let id: DossierId = parse_id(&id, "dossier")?;
    let dossier = services
        .dossiers
        .update_notes(id, &request.notes, &actor, Utc::now())?;
    Ok(Json(dossier))
}

pub(crate) async fn history(
    State(services): State<SharedServices>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let actor = services.actor(&headers)?;
    let id: DossierId = parse_id(&id, "dossier")?;
    Ok(Json(services.dossiers.history(id, &actor)?))
}

pub(crate) async fn emails(
    State(services): State<SharedServices>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let actor = services.actor(&headers)?;
    let id: DossierId = parse_id(&id, "dossier")?;
    Ok(Json(services.dossiers.emails(id, &actor)?))
}

pub(crate) async fn list_documents(
    State(services): State<SharedServices>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let actor = services.actor(&headers)?;
    let id: DossierId = parse_id(&id, "dossier")?;
    Ok(Json(services.documents.list(id, &actor)?))
}

/// Raw-body upload: the file name and kind travel in the query string, the
/// `Content-Type` header describes the bytes.
pub(crate) async fn upload_document(
    State(services): State<SharedServices>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let actor = services.actor(&headers)?;
    let dossier_id: DossierId = parse_id(&id, "dossier")?;
    let kind = match params.kind.as_deref() {
        Some(raw) => DocumentKind::parse(raw)
            .ok_or_else(|| AppError::bad_request(format!("unknown document kind: {raw}")))?,
        None => DocumentKind::Autre,
    };
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .filter(|value| value != mime::APPLICATION_OCTET_STREAM.essence_str());

    let document = services.documents.upload(
        UploadRequest {
            dossier_id,
            name: params.name,
            kind,
            content_type,
            bytes: body.to_vec(),
        },
        &actor,
        Utc::now(),
    )?;
    Ok((StatusCode::CREATED, Json(document)))
}

pub(crate) async fn export_csv(
    State(services): State<SharedServices>,
    headers: HeaderMap,
    Query(filter): Query<DossierFilter>,
) -> Result<impl IntoResponse, AppError> {
    let actor = services.actor(&headers)?;
    let csv = services.dossiers.export_csv(&filter, &actor)?;
    let filename = format!("dossiers-{}.csv", Utc::now().format("%Y%m%d"));
    Ok((
        [
            (CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        csv,
    ))
}
