//! One-shot administration commands.

use chrono::Utc;
use clap::Args;
use dossier_flow::auth::{AuthService, NewUser};
use dossier_flow::config::{AppConfig, ConfigError};
use dossier_flow::domain::Role;
use dossier_flow::error::AppError;
use dossier_flow::repository::SqliteStore;
use dossier_flow::telemetry;
use tracing::info;

use crate::infra::build_store;

#[derive(Args, Debug)]
pub(crate) struct CreateAdminArgs {
    /// Login e-mail of the new administrator
    #[arg(long)]
    pub(crate) email: String,
    /// Display name
    #[arg(long)]
    pub(crate) name: String,
    /// Initial password (at least 8 characters)
    #[arg(long)]
    pub(crate) password: String,
}

pub(crate) fn migrate() -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry, config.environment)?;

    let path = config
        .database
        .path
        .as_ref()
        .ok_or(ConfigError::MissingDatabasePath)?;
    let store = SqliteStore::open(path)?;
    let version = store.schema_version()?;

    info!(path = %path.display(), version, "database schema up to date");
    println!("schema version {version} at {}", path.display());
    Ok(())
}

pub(crate) fn create_admin(args: CreateAdminArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry, config.environment)?;

    if config.database.path.is_none() {
        return Err(ConfigError::MissingDatabasePath.into());
    }
    let store = build_store(&config.database)?;
    let auth = AuthService::new(store, &config.auth);
    let user = auth.register(
        NewUser {
            email: args.email,
            display_name: args.name,
            password: args.password,
            role: Role::Admin,
            entreprise_id: None,
        },
        Utc::now(),
    )?;

    println!("created admin {} ({})", user.email, user.id);
    Ok(())
}
