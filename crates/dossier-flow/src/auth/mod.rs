//! Password hashing, signed sessions, cookies and refresh-token rotation.

mod cookies;
mod password;
mod service;
mod session;

pub use cookies::{
    clear_cookies, read_cookie, refresh_cookie, session_cookie, session_token, REFRESH_COOKIE,
    SESSION_COOKIE,
};
pub use password::{hash_password, verify_password, verify_without_account, MIN_PASSWORD_LENGTH};
pub use service::{AuthService, IssuedRefreshToken, LoginOutcome, NewUser};
pub use session::{Claims, SessionSigner, SessionToken};

use serde::Serialize;

use crate::domain::{Dossier, EntrepriseId, Role, UserId};
use crate::repository::RepositoryError;

/// Authenticated caller of a service operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
    pub entreprise_id: Option<EntrepriseId>,
}

impl Actor {
    pub fn can_view_entreprise(&self, id: EntrepriseId) -> bool {
        match self.role {
            Role::Admin | Role::Consultant => true,
            Role::Rh | Role::User => self.entreprise_id == Some(id),
        }
    }

    /// Admins see everything, consultants their assigned dossiers, company staff their
    /// company's dossiers.
    pub fn can_view_dossier(&self, dossier: &Dossier) -> bool {
        match self.role {
            Role::Admin => true,
            Role::Consultant => dossier.consultant_id == Some(self.user_id),
            Role::Rh | Role::User => self.entreprise_id == Some(dossier.entreprise_id),
        }
    }

    /// Write access to hours, notes and documents.
    pub fn can_edit_dossier(&self, dossier: &Dossier) -> bool {
        match self.role {
            Role::Admin => true,
            Role::Consultant => dossier.consultant_id == Some(self.user_id),
            Role::Rh => self.entreprise_id == Some(dossier.entreprise_id),
            Role::User => false,
        }
    }
}

impl From<&Claims> for Actor {
    fn from(claims: &Claims) -> Self {
        Self {
            user_id: claims.sub,
            role: claims.role,
            entreprise_id: claims.entreprise_id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("account is disabled")]
    InactiveAccount,
    #[error("password must be at least {MIN_PASSWORD_LENGTH} characters")]
    WeakPassword,
    #[error("an account already uses this email")]
    EmailTaken,
    #[error("authentication required")]
    MissingToken,
    #[error("invalid session token")]
    InvalidToken,
    #[error("session expired")]
    TokenExpired,
    #[error("refresh token was already used; session revoked")]
    RefreshReused,
    #[error("credential processing failed: {0}")]
    Hashing(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
