use std::sync::Arc;

use axum::body::Body;
use axum::http::Response;
use chrono::{NaiveDate, Utc};
use serde_json::Value;

use crate::auth::{Actor, SessionSigner};
use crate::config::{AppConfig, AuthConfig};
use crate::domain::{Beneficiary, Dossier, Entreprise, OpcoContact, Role, User, UserId};
use crate::http::{AppServices, Gateways};
use crate::repository::{MemoryStore, UserRepository};
use crate::services::adapters::{MemoryBlobStorage, OutboxMailer, StaticRegistry, TextPdfRenderer};
use crate::services::{NewDossier, RegisterEntreprise};
use crate::workflow::DossierKind;

pub(super) const ACME_SIRET: &str = "73282932000074";
pub(super) const OTHER_SIRET: &str = "44306184100047";

pub(super) struct Fixture {
    pub store: Arc<MemoryStore>,
    pub mailer: Arc<OutboxMailer>,
    pub storage: Arc<MemoryBlobStorage>,
    pub services: Arc<AppServices>,
    pub admin: Actor,
    pub consultant: Actor,
    pub rh: Actor,
    pub entreprise: Entreprise,
    pub admin_user: User,
}

/// Users are inserted directly; hashing is only exercised by the login tests.
pub(super) fn seed_user(
    store: &MemoryStore,
    email: &str,
    role: Role,
    entreprise: Option<&Entreprise>,
) -> User {
    let user = User {
        id: UserId::new(),
        email: email.to_string(),
        display_name: email.split('@').next().unwrap_or(email).to_string(),
        role,
        password_hash: String::new(),
        entreprise_id: entreprise.map(|entreprise| entreprise.id),
        active: true,
        created_at: Utc::now(),
    };
    store.insert_user(&user).expect("user inserted");
    user
}

pub(super) fn actor(user: &User) -> Actor {
    Actor {
        user_id: user.id,
        role: user.role,
        entreprise_id: user.entreprise_id,
    }
}

pub(super) fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let mailer = Arc::new(OutboxMailer::new());
    let storage = Arc::new(MemoryBlobStorage::new());
    let gateways = Gateways {
        registry: Arc::new(StaticRegistry::new()),
        mailer: mailer.clone(),
        storage: storage.clone(),
        renderer: Arc::new(TextPdfRenderer),
    };
    let services = Arc::new(AppServices::new(
        store.clone(),
        gateways,
        &AppConfig::development(),
    ));

    let admin_user = seed_user(&store, "admin@bo.fr", Role::Admin, None);
    let admin = actor(&admin_user);

    let entreprise = services
        .entreprises
        .register(
            RegisterEntreprise {
                siret: ACME_SIRET.to_string(),
                raison_sociale: Some("Acme Industrie".to_string()),
                contact_email: Some("rh@acme.fr".to_string()),
                opco: Some(OpcoContact {
                    name: "OPCO Atlas".to_string(),
                    email: Some("demandes@atlas.fr".to_string()),
                }),
                ..RegisterEntreprise::default()
            },
            &admin,
            Utc::now(),
        )
        .expect("entreprise registered");

    let consultant = actor(&seed_user(&store, "julie@bo.fr", Role::Consultant, None));
    let rh = actor(&seed_user(&store, "rh@acme.fr", Role::Rh, Some(&entreprise)));

    Fixture {
        store,
        mailer,
        storage,
        services,
        admin,
        consultant,
        rh,
        entreprise,
        admin_user,
    }
}

pub(super) fn beneficiary(email: Option<&str>) -> Beneficiary {
    Beneficiary {
        first_name: "Claire".to_string(),
        last_name: "Martin".to_string(),
        email: email.map(str::to_string),
    }
}

impl Fixture {
    pub fn bilan(&self) -> Dossier {
        self.services
            .dossiers
            .create(
                NewDossier {
                    kind: DossierKind::BilanCompetences,
                    entreprise_id: self.entreprise.id,
                    beneficiary: beneficiary(Some("claire.martin@example.fr")),
                    consultant_id: Some(self.consultant.user_id),
                    hours_planned: 24,
                    start_date: NaiveDate::from_ymd_opt(2025, 3, 3),
                    end_date: NaiveDate::from_ymd_opt(2025, 6, 27),
                    notes: String::new(),
                },
                &self.admin,
                Utc::now(),
            )
            .expect("bilan created")
    }

    pub fn formation(&self) -> Dossier {
        self.services
            .dossiers
            .create(
                NewDossier {
                    kind: DossierKind::FormationOpco,
                    entreprise_id: self.entreprise.id,
                    beneficiary: beneficiary(None),
                    consultant_id: None,
                    hours_planned: 35,
                    start_date: None,
                    end_date: None,
                    notes: "Formation CACES".to_string(),
                },
                &self.rh,
                Utc::now(),
            )
            .expect("formation created")
    }

    /// Session token for `user`, minted with the development signer.
    pub fn token(&self, user: &User) -> String {
        let config = AuthConfig::development();
        SessionSigner::new(config.session_secret.as_bytes(), config.session_ttl)
            .issue(user, Utc::now())
            .expect("token issued")
            .token
    }
}

pub(super) async fn read_json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body readable");
    serde_json::from_slice(&bytes).expect("valid json")
}
