use std::sync::Arc;

use axum::http::HeaderMap;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use super::cookies::{clear_cookies, refresh_cookie, session_cookie, session_token};
use super::password::{hash_password, verify_password, verify_without_account};
use super::session::{SessionSigner, SessionToken};
use super::{Actor, AuthError};
use crate::config::AuthConfig;
use crate::domain::{EntrepriseId, RefreshTokenId, Role, User, UserId};
use crate::repository::{RefreshTokenRecord, RepositoryError, Store};

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub display_name: String,
    pub password: String,
    pub role: Role,
    pub entreprise_id: Option<EntrepriseId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedRefreshToken {
    #[serde(skip)]
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of a successful login or refresh.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub session: SessionToken,
    pub refresh: IssuedRefreshToken,
}

/// Credential checks, session issuance and refresh-token rotation.
pub struct AuthService {
    store: Arc<dyn Store>,
    signer: SessionSigner,
    refresh_ttl: Duration,
    cookie_secure: bool,
}

fn digest(raw: &str) -> String {
    format!("{:x}", Sha256::digest(raw.as_bytes()))
}

fn random_token() -> String {
    let mut bytes = [0_u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

impl AuthService {
    pub fn new(store: Arc<dyn Store>, config: &AuthConfig) -> Self {
        Self {
            store,
            signer: SessionSigner::new(config.session_secret.as_bytes(), config.session_ttl),
            refresh_ttl: config.refresh_ttl,
            cookie_secure: config.cookie_secure,
        }
    }

    pub fn register(&self, new_user: NewUser, now: DateTime<Utc>) -> Result<User, AuthError> {
        let email = User::normalize_email(&new_user.email);
        if self.store.find_user_by_email(&email)?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let user = User {
            id: UserId::new(),
            email,
            display_name: new_user.display_name.trim().to_string(),
            role: new_user.role,
            password_hash: hash_password(&new_user.password)?,
            entreprise_id: new_user.entreprise_id,
            active: true,
            created_at: now,
        };

        match self.store.insert_user(&user) {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) => return Err(AuthError::EmailTaken),
            Err(other) => return Err(other.into()),
        }
        info!(user = %user.id, role = %user.role, "user registered");
        Ok(user)
    }

    pub fn login(
        &self,
        email: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<LoginOutcome, AuthError> {
        let user = match self.store.find_user_by_email(email)? {
            Some(user) if verify_password(password, &user.password_hash) => user,
            Some(_) => {
                warn!("login rejected");
                return Err(AuthError::InvalidCredentials);
            }
            None => {
                verify_without_account(password);
                warn!("login rejected");
                return Err(AuthError::InvalidCredentials);
            }
        };
        if !user.active {
            return Err(AuthError::InactiveAccount);
        }

        let refresh = self.new_refresh_record(user.id, Uuid::new_v4(), now);
        self.store.insert_refresh_token(&refresh.0)?;

        info!(user = %user.id, role = %user.role, "login succeeded");
        self.outcome(user, refresh.1, now)
    }

    /// Exchanges a refresh token for a new pair. A token presented twice revokes its
    /// whole family.
    pub fn refresh(&self, raw: &str, now: DateTime<Utc>) -> Result<LoginOutcome, AuthError> {
        let record = self
            .store
            .find_refresh_token(&digest(raw))?
            .ok_or(AuthError::InvalidToken)?;

        if record.revoked_at.is_some() {
            let revoked = self.store.revoke_family(record.family_id, now)?;
            warn!(user = %record.user_id, family = %record.family_id, revoked, "refresh token reuse detected");
            return Err(AuthError::RefreshReused);
        }
        if record.expires_at <= now {
            return Err(AuthError::TokenExpired);
        }

        let user = self
            .store
            .find_user(record.user_id)?
            .ok_or(AuthError::InvalidToken)?;
        if !user.active {
            self.store.revoke_family(record.family_id, now)?;
            return Err(AuthError::InactiveAccount);
        }

        let (replacement, token) = self.new_refresh_record(user.id, record.family_id, now);
        match self.store.rotate_refresh_token(record.id, &replacement, now) {
            Ok(()) => {}
            Err(RepositoryError::Stale) => {
                self.store.revoke_family(record.family_id, now)?;
                return Err(AuthError::RefreshReused);
            }
            Err(other) => return Err(other.into()),
        }

        self.outcome(user, token, now)
    }

    pub fn logout(&self, raw: &str, now: DateTime<Utc>) -> Result<(), AuthError> {
        if let Some(record) = self.store.find_refresh_token(&digest(raw))? {
            self.store.revoke_family(record.family_id, now)?;
            info!(user = %record.user_id, "logged out");
        }
        Ok(())
    }

    /// Resolves the caller from the bearer header or session cookie.
    pub fn authenticate(&self, headers: &HeaderMap, now: DateTime<Utc>) -> Result<Actor, AuthError> {
        let token = session_token(headers).ok_or(AuthError::MissingToken)?;
        let claims = self.signer.verify(&token, now)?;

        // Deactivation takes effect before the session expires.
        match self.store.find_user(claims.sub)? {
            Some(user) if user.active => Ok(Actor::from(&claims)),
            Some(_) => Err(AuthError::InactiveAccount),
            None => Err(AuthError::InvalidToken),
        }
    }

    pub fn current_user(&self, actor: &Actor) -> Result<User, AuthError> {
        self.store
            .find_user(actor.user_id)?
            .ok_or(AuthError::InvalidToken)
    }

    /// `Set-Cookie` values for a login or refresh response.
    pub fn cookies(&self, outcome: &LoginOutcome) -> [String; 2] {
        [
            session_cookie(
                &outcome.session.token,
                self.signer.ttl(),
                self.cookie_secure,
            ),
            refresh_cookie(&outcome.refresh.token, self.refresh_ttl, self.cookie_secure),
        ]
    }

    pub fn logout_cookies(&self) -> [String; 2] {
        clear_cookies(self.cookie_secure)
    }

    fn new_refresh_record(
        &self,
        user_id: UserId,
        family_id: Uuid,
        now: DateTime<Utc>,
    ) -> (RefreshTokenRecord, IssuedRefreshToken) {
        let token = random_token();
        let expires_at = now + self.refresh_ttl;
        let record = RefreshTokenRecord {
            id: RefreshTokenId::new(),
            user_id,
            token_hash: digest(&token),
            family_id,
            expires_at,
            created_at: now,
            revoked_at: None,
            replaced_by: None,
        };
        (record, IssuedRefreshToken { token, expires_at })
    }

    fn outcome(
        &self,
        user: User,
        refresh: IssuedRefreshToken,
        now: DateTime<Utc>,
    ) -> Result<LoginOutcome, AuthError> {
        let session = self.signer.issue(&user, now)?;
        Ok(LoginOutcome {
            user,
            session,
            refresh,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MemoryStore, RefreshTokenRepository};
    use axum::http::header::AUTHORIZATION;
    use axum::http::HeaderValue;

    fn service() -> (AuthService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let service = AuthService::new(store.clone(), &AuthConfig::development());
        (service, store)
    }

    fn register(service: &AuthService) -> User {
        service
            .register(
                NewUser {
                    email: " Consultant@Example.FR ".to_string(),
                    display_name: "Julie Bernard".to_string(),
                    password: "motdepasse-solide".to_string(),
                    role: Role::Consultant,
                    entreprise_id: None,
                },
                Utc::now(),
            )
            .expect("registration succeeds")
    }

    #[test]
    fn login_normalizes_email_and_issues_tokens() {
        let (service, _) = service();
        let user = register(&service);
        assert_eq!(user.email, "consultant@example.fr");

        let outcome = service
            .login("CONSULTANT@example.fr", "motdepasse-solide", Utc::now())
            .expect("login succeeds");
        assert_eq!(outcome.user.id, user.id);

        let mut headers = HeaderMap::new();
        let bearer = format!("Bearer {}", outcome.session.token);
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&bearer).expect("header"));
        let actor = service
            .authenticate(&headers, Utc::now())
            .expect("session verifies");
        assert_eq!(actor.role, Role::Consultant);
    }

    #[test]
    fn wrong_password_and_unknown_email_look_the_same() {
        let (service, _) = service();
        register(&service);

        let wrong = service.login("consultant@example.fr", "mauvais-mdp", Utc::now());
        let unknown = service.login("nobody@example.fr", "motdepasse-solide", Utc::now());
        assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));
        assert!(matches!(unknown, Err(AuthError::InvalidCredentials)));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let (service, _) = service();
        register(&service);
        let again = service.register(
            NewUser {
                email: "consultant@example.fr".to_string(),
                display_name: "Doublon".to_string(),
                password: "motdepasse-solide".to_string(),
                role: Role::User,
                entreprise_id: None,
            },
            Utc::now(),
        );
        assert!(matches!(again, Err(AuthError::EmailTaken)));
    }

    #[test]
    fn refresh_rotates_and_detects_reuse() {
        let (service, store) = service();
        register(&service);
        let now = Utc::now();
        let first = service
            .login("consultant@example.fr", "motdepasse-solide", now)
            .expect("login");

        let second = service
            .refresh(&first.refresh.token, now)
            .expect("rotation succeeds");
        assert_ne!(second.refresh.token, first.refresh.token);

        let stored = store
            .find_refresh_token(&digest(&first.refresh.token))
            .expect("lookup")
            .expect("record kept");
        assert!(stored.revoked_at.is_some());

        assert!(matches!(
            service.refresh(&first.refresh.token, now),
            Err(AuthError::RefreshReused)
        ));
        // Reuse burns the whole family, including the token issued by the rotation.
        assert!(matches!(
            service.refresh(&second.refresh.token, now),
            Err(AuthError::RefreshReused)
        ));
    }

    #[test]
    fn expired_refresh_tokens_are_rejected() {
        let (service, _) = service();
        register(&service);
        let now = Utc::now();
        let outcome = service
            .login("consultant@example.fr", "motdepasse-solide", now)
            .expect("login");
        let later = now + Duration::days(31);
        assert!(matches!(
            service.refresh(&outcome.refresh.token, later),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn logout_revokes_the_family() {
        let (service, _) = service();
        register(&service);
        let now = Utc::now();
        let outcome = service
            .login("consultant@example.fr", "motdepasse-solide", now)
            .expect("login");
        service.logout(&outcome.refresh.token, now).expect("logout");
        assert!(service.refresh(&outcome.refresh.token, now).is_err());
    }

    #[test]
    fn missing_credentials_are_reported() {
        let (service, _) = service();
        assert!(matches!(
            service.authenticate(&HeaderMap::new(), Utc::now()),
            Err(AuthError::MissingToken)
        ));
    }
}
