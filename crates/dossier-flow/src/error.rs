use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::domain::FactureError;
use crate::repository::RepositoryError;
use crate::services::ServiceError;
use crate::telemetry::TelemetryError;
use crate::workflow::WorkflowError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;
use tracing::error;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Auth(AuthError),
    Service(ServiceError),
    Repository(RepositoryError),
    BadRequest(String),
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_) | AppError::Telemetry(_) | AppError::Io(_) | AppError::Server(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(err) => auth_status(err),
            AppError::Service(err) => service_status(err),
            AppError::Repository(err) => repository_status(err),
        }
    }
}

fn repository_status(err: &RepositoryError) -> StatusCode {
    match err {
        RepositoryError::Conflict(_) | RepositoryError::Stale => StatusCode::CONFLICT,
        RepositoryError::NotFound => StatusCode::NOT_FOUND,
        RepositoryError::Corrupt(_) | RepositoryError::Unavailable(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn auth_status(err: &AuthError) -> StatusCode {
    match err {
        AuthError::InvalidCredentials
        | AuthError::MissingToken
        | AuthError::InvalidToken
        | AuthError::TokenExpired
        | AuthError::RefreshReused => StatusCode::UNAUTHORIZED,
        AuthError::InactiveAccount => StatusCode::FORBIDDEN,
        AuthError::WeakPassword => StatusCode::UNPROCESSABLE_ENTITY,
        AuthError::EmailTaken => StatusCode::CONFLICT,
        AuthError::Hashing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        AuthError::Repository(err) => repository_status(err),
    }
}

fn service_status(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::Workflow(WorkflowError::Forbidden { .. }) | ServiceError::Forbidden(_) => {
            StatusCode::FORBIDDEN
        }
        ServiceError::Workflow(WorkflowError::CommentRequired { .. }) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ServiceError::Workflow(_) => StatusCode::CONFLICT,
        ServiceError::Facture(FactureError::NotOutstanding(_)) => StatusCode::CONFLICT,
        ServiceError::Dossier(_)
        | ServiceError::Facture(_)
        | ServiceError::Siret(_)
        | ServiceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::Repository(err) => repository_status(err),
        ServiceError::Gateway(_) | ServiceError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Auth(err) => write!(f, "{}", err),
            AppError::Service(err) => write!(f, "{}", err),
            AppError::Repository(err) => write!(f, "{}", err),
            AppError::BadRequest(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Auth(err) => Some(err),
            AppError::Service(err) => Some(err),
            AppError::Repository(err) => Some(err),
            AppError::BadRequest(_) => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<AuthError> for AppError {
    fn from(value: AuthError) -> Self {
        Self::Auth(value)
    }
}

impl From<ServiceError> for AppError {
    fn from(value: ServiceError) -> Self {
        Self::Service(value)
    }
}

impl From<RepositoryError> for AppError {
    fn from(value: RepositoryError) -> Self {
        Self::Repository(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DossierError, Role};
    use crate::workflow::DossierStatus;

    #[test]
    fn workflow_errors_map_to_distinct_statuses() {
        let forbidden = AppError::from(ServiceError::Workflow(WorkflowError::Forbidden {
            role: Role::User,
            to: DossierStatus::Phase1,
        }));
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

        let comment = AppError::from(ServiceError::Workflow(WorkflowError::CommentRequired {
            to: DossierStatus::Refuse,
        }));
        assert_eq!(comment.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let terminal = AppError::from(ServiceError::Workflow(WorkflowError::Terminal(
            DossierStatus::Facture,
        )));
        assert_eq!(terminal.status(), StatusCode::CONFLICT);

        let closing = AppError::from(ServiceError::Workflow(WorkflowError::InvoiceRequired(
            DossierStatus::Facture,
        )));
        assert_eq!(closing.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn out_of_range_invoices_are_unprocessable() {
        assert_eq!(
            AppError::from(ServiceError::Facture(FactureError::PaymentTermTooLong(400))).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::from(ServiceError::Facture(FactureError::AmountTooLarge(i64::MAX))).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn stale_writes_and_missing_records() {
        assert_eq!(
            AppError::from(ServiceError::Repository(RepositoryError::Stale)).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(ServiceError::NotFound("dossier")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(ServiceError::Dossier(DossierError::MissingBeneficiary)).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::from(AuthError::TokenExpired).status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
