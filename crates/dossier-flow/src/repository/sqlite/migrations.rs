//! Forward-only schema migrations, each applied in its own transaction.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::repository::RepositoryError;

use super::storage_err;

type Migration = (u32, &'static str, &'static str);

const MIGRATIONS: [Migration; 3] = [
    (1, "initial_schema", V001_INITIAL_SCHEMA),
    (2, "refresh_tokens", V002_REFRESH_TOKENS),
    (3, "email_log", V003_EMAIL_LOG),
];

pub const LATEST_VERSION: u32 = 3;

const V001_INITIAL_SCHEMA: &str = "
CREATE TABLE users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    role TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    entreprise_id TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE TABLE entreprises (
    id TEXT PRIMARY KEY,
    siret TEXT NOT NULL UNIQUE,
    raison_sociale TEXT NOT NULL,
    address TEXT,
    naf_code TEXT,
    contact_email TEXT,
    opco_name TEXT,
    opco_email TEXT,
    source TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE dossiers (
    id TEXT PRIMARY KEY,
    reference TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    status TEXT NOT NULL,
    entreprise_id TEXT NOT NULL REFERENCES entreprises(id),
    beneficiary_first_name TEXT NOT NULL,
    beneficiary_last_name TEXT NOT NULL,
    beneficiary_email TEXT,
    consultant_id TEXT REFERENCES users(id),
    hours_planned INTEGER NOT NULL DEFAULT 0,
    hours_completed INTEGER NOT NULL DEFAULT 0,
    start_date TEXT,
    end_date TEXT,
    notes TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX idx_dossiers_entreprise ON dossiers(entreprise_id);
CREATE INDEX idx_dossiers_status ON dossiers(status);

CREATE TABLE historique (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    dossier_id TEXT NOT NULL REFERENCES dossiers(id),
    actor_id TEXT NOT NULL,
    action TEXT NOT NULL,
    old_value TEXT,
    new_value TEXT,
    comment TEXT,
    recorded_at TEXT NOT NULL
);
CREATE INDEX idx_historique_dossier ON historique(dossier_id, seq);

CREATE TRIGGER historique_append_only_update BEFORE UPDATE ON historique
BEGIN
    SELECT RAISE(ABORT, 'historique is append-only');
END;
CREATE TRIGGER historique_append_only_delete BEFORE DELETE ON historique
BEGIN
    SELECT RAISE(ABORT, 'historique is append-only');
END;

CREATE TABLE documents (
    id TEXT PRIMARY KEY,
    dossier_id TEXT NOT NULL REFERENCES dossiers(id),
    name TEXT NOT NULL,
    storage_key TEXT NOT NULL,
    url TEXT,
    kind TEXT NOT NULL,
    content_type TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    uploaded_by TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX idx_documents_dossier ON documents(dossier_id);

CREATE TABLE factures (
    id TEXT PRIMARY KEY,
    dossier_id TEXT NOT NULL REFERENCES dossiers(id),
    year INTEGER NOT NULL,
    sequence INTEGER NOT NULL,
    amount_ht_cents INTEGER NOT NULL,
    vat_rate_bp INTEGER NOT NULL,
    due_date TEXT NOT NULL,
    status TEXT NOT NULL,
    issued_at TEXT NOT NULL,
    paid_at TEXT,
    UNIQUE (year, sequence)
);
CREATE INDEX idx_factures_dossier ON factures(dossier_id);

CREATE TABLE sequences (
    scope TEXT NOT NULL,
    year INTEGER NOT NULL,
    value INTEGER NOT NULL,
    PRIMARY KEY (scope, year)
);
";

const V002_REFRESH_TOKENS: &str = "
CREATE TABLE refresh_tokens (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    token_hash TEXT NOT NULL UNIQUE,
    family_id TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    revoked_at TEXT,
    replaced_by TEXT
);
CREATE INDEX idx_refresh_tokens_family ON refresh_tokens(family_id);
";

const V003_EMAIL_LOG: &str = "
CREATE TABLE emails (
    id TEXT PRIMARY KEY,
    dossier_id TEXT REFERENCES dossiers(id),
    recipient TEXT NOT NULL,
    template TEXT NOT NULL,
    subject TEXT NOT NULL,
    body TEXT NOT NULL,
    status TEXT NOT NULL,
    error TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX idx_emails_dossier ON emails(dossier_id);
";

/// Current schema version, 0 for a fresh database.
pub fn current_version(conn: &Connection) -> Result<u32, RepositoryError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(storage_err)?;

    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(storage_err)
}

/// Applies pending migrations and returns how many ran.
pub fn run_migrations(conn: &mut Connection) -> Result<u32, RepositoryError> {
    let current = current_version(conn)?;
    if current >= LATEST_VERSION {
        debug!("database schema is up to date (v{current})");
        return Ok(0);
    }

    info!(from = current, to = LATEST_VERSION, "running database migrations");

    let mut applied = 0;
    for (version, name, sql) in MIGRATIONS {
        if version <= current {
            continue;
        }
        let tx = conn.transaction().map_err(storage_err)?;
        tx.execute_batch(sql).map_err(storage_err)?;
        tx.execute(
            "INSERT INTO schema_version (version, name) VALUES (?1, ?2)",
            rusqlite::params![version, name],
        )
        .map_err(storage_err)?;
        tx.commit().map_err(storage_err)?;
        debug!(version, name, "migration applied");
        applied += 1;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().expect("open");
        assert_eq!(run_migrations(&mut conn).expect("first run"), LATEST_VERSION);
        assert_eq!(run_migrations(&mut conn).expect("second run"), 0);
        assert_eq!(current_version(&conn).expect("version"), LATEST_VERSION);
    }

    #[test]
    fn historique_rejects_updates() {
        let mut conn = Connection::open_in_memory().expect("open");
        run_migrations(&mut conn).expect("migrate");
        conn.execute_batch(
            "INSERT INTO entreprises (id, siret, raison_sociale, source, created_at)
                VALUES ('e', '73282932000074', 'Acme', 'manual', '2025-01-01T00:00:00Z');
             INSERT INTO dossiers (id, reference, kind, status, entreprise_id,
                beneficiary_first_name, beneficiary_last_name, created_at, updated_at)
                VALUES ('d', 'DOS-2025-00001', 'bilan_competences', 'nouveau', 'e', 'A', 'B',
                '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z');
             INSERT INTO historique (id, dossier_id, actor_id, action, recorded_at)
                VALUES ('h', 'd', 'u', 'created', '2025-01-01T00:00:00Z');",
        )
        .expect("seed");

        let result = conn.execute("UPDATE historique SET comment = 'edited'", []);
        assert!(result.is_err());
    }
}
