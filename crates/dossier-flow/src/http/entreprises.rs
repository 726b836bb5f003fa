use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;

use super::{parse_id, SharedServices};
use crate::domain::{EntrepriseId, OpcoContact};
use crate::error::AppError;
use crate::services::RegisterEntreprise;

pub(crate) async fn list(
    State(services): State<SharedServices>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let actor = services.actor(&headers)?;
    Ok(Json(services.entreprises.list(&actor)?))
}

pub(crate) async fn register(
    State(services): State<SharedServices>,
    headers: HeaderMap,
    Json(request): Json<RegisterEntreprise>,
) -> Result<impl IntoResponse, AppError> {
    let actor = services.actor(&headers)?;
    let entreprise = services.entreprises.register(request, &actor, Utc::now())?;
    Ok((StatusCode::CREATED, Json(entreprise)))
}

pub(crate) async fn show(
    State(services): State<SharedServices>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let actor = services.actor(&headers)?;
    let id: EntrepriseId = parse_id(&id, "entreprise")?;
    Ok(Json(services.entreprises.get(id, &actor)?))
}

pub(crate) async fn assign_opco(
    State(services): State<SharedServices>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(opco): Json<OpcoContact>,
) -> Result<impl IntoResponse, AppError> {
    let actor = services.actor(&headers)?;
    let id: EntrepriseId = parse_id(&id, "entreprise")?;
    Ok(Json(services.entreprises.assign_opco(id, opco, &actor)?))
}
