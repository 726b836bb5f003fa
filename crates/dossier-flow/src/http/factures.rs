use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;

use super::{parse_id, SharedServices};
use crate::domain::{DossierId, FactureId};
use crate::error::AppError;
use crate::services::IssueFacture;

pub(crate) async fn list(
    State(services): State<SharedServices>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let actor = services.actor(&headers)?;
    let id: DossierId = parse_id(&id, "dossier")?;
    Ok(Json(services.factures.list(id, &actor)?))
}

pub(crate) async fn issue(
    State(services): State<SharedServices>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<IssueFacture>,
) -> Result<impl IntoResponse, AppError> {
    let actor = services.actor(&headers)?;
    let id: DossierId = parse_id(&id, "dossier")?;
    let outcome = services.factures.issue(id, request, &actor, Utc::now())?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub(crate) async fn mark_paid(
    State(services): State<SharedServices>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let actor = services.actor(&headers)?;
    let id: FactureId = parse_id(&id, "facture")?;
    Ok(Json(services.factures.mark_paid(id, &actor, Utc::now())?))
}

pub(crate) async fn cancel(
    State(services): State<SharedServices>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let actor = services.actor(&headers)?;
    let id: FactureId = parse_id(&id, "facture")?;
    Ok(Json(services.factures.cancel(id, &actor, Utc::now())?))
}
