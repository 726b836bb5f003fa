//! SQLite-backed store executing parameterized queries over a single connection.

pub mod migrations;

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use tracing::info;
use uuid::Uuid;

use super::{
    DocumentRepository, DossierFilter, DossierRepository, EmailLogRepository,
    EntrepriseRepository, FactureRepository, RefreshTokenRecord, RefreshTokenRepository,
    RepositoryError, SequenceRepository, SequenceScope, UserRepository,
};
use crate::domain::{
    Beneficiary, Document, DocumentKind, Dossier, DossierId, EmailLog, EmailStatus, Entreprise,
    EnrichmentSource, EntrepriseId, Facture, FactureId, FactureNumber, HistoriqueEntry,
    OpcoContact, RefreshTokenId, Siret, User, UserId,
};
use crate::workflow::DossierStatus;

pub(crate) fn storage_err(error: rusqlite::Error) -> RepositoryError {
    match error {
        rusqlite::Error::SqliteFailure(code, message)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            RepositoryError::Conflict(message.unwrap_or_else(|| "constraint violation".to_string()))
        }
        other => RepositoryError::Unavailable(other.to_string()),
    }
}

fn corrupt(column: &str, raw: &str) -> RepositoryError {
    RepositoryError::Corrupt(format!("{column} = '{raw}'"))
}

fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|_| corrupt(column, raw))
}

fn parse_optional_timestamp(
    column: &str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.map(|value| parse_timestamp(column, &value)).transpose()
}

fn parse_date(column: &str, raw: Option<String>) -> Result<Option<NaiveDate>, RepositoryError> {
    raw.map(|value| {
        NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|_| corrupt(column, &value))
    })
    .transpose()
}

fn parse<T: FromStr>(column: &str, raw: &str) -> Result<T, RepositoryError> {
    raw.parse().map_err(|_| corrupt(column, raw))
}

fn parse_optional<T: FromStr>(column: &str, raw: Option<String>) -> Result<Option<T>, RepositoryError> {
    raw.map(|value| parse(column, &value)).transpose()
}

fn to_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| corrupt(column, &value.to_string()))
}

/// Single-connection store; the mutex serializes writers the way SQLite does anyway.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) a file-backed database and applies pending migrations.
    pub fn open(path: &Path) -> Result<Self, RepositoryError> {
        let conn = Connection::open(path).map_err(storage_err)?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(storage_err)?;
        info!(path = %path.display(), journal_mode = %mode, "opened sqlite store");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        Self::from_connection(Connection::open_in_memory().map_err(storage_err)?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, RepositoryError> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(storage_err)?;
        migrations::run_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn schema_version(&self) -> Result<u32, RepositoryError> {
        migrations::current_version(&*self.lock()?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, RepositoryError> {
        self.conn
            .lock()
            .map_err(|_| RepositoryError::Unavailable("sqlite connection mutex poisoned".to_string()))
    }
}

const USER_COLUMNS: &str =
    "id, email, display_name, role, password_hash, entreprise_id, active, created_at";

struct UserRow {
    id: String,
    email: String,
    display_name: String,
    role: String,
    password_hash: String,
    entreprise_id: Option<String>,
    active: bool,
    created_at: String,
}

impl UserRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            display_name: row.get(2)?,
            role: row.get(3)?,
            password_hash: row.get(4)?,
            entreprise_id: row.get(5)?,
            active: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn decode(self) -> Result<User, RepositoryError> {
        Ok(User {
            id: parse("users.id", &self.id)?,
            email: self.email,
            display_name: self.display_name,
            role: parse("users.role", &self.role)?,
            password_hash: self.password_hash,
            entreprise_id: parse_optional("users.entreprise_id", self.entreprise_id)?,
            active: self.active,
            created_at: parse_timestamp("users.created_at", &self.created_at)?,
        })
    }
}

impl UserRepository for SqliteStore {
    fn insert_user(&self, user: &User) -> Result<(), RepositoryError> {
        self.lock()?
            .execute(
                "INSERT INTO users (id, email, display_name, role, password_hash, entreprise_id, active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    user.id.to_string(),
                    user.email,
                    user.display_name,
                    user.role.as_str(),
                    user.password_hash,
                    user.entreprise_id.map(|id| id.to_string()),
                    user.active,
                    timestamp(&user.created_at),
                ],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    fn find_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let row = self
            .lock()?
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                UserRow::read,
            )
            .optional()
            .map_err(storage_err)?;
        row.map(UserRow::decode).transpose()
    }

    fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let row = self
            .lock()?
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![User::normalize_email(email)],
                UserRow::read,
            )
            .optional()
            .map_err(storage_err)?;
        row.map(UserRow::decode).transpose()
    }
}

const ENTREPRISE_COLUMNS: &str = "id, siret, raison_sociale, address, naf_code, contact_email, opco_name, opco_email, source, created_at";

struct EntrepriseRow {
    id: String,
    siret: String,
    raison_sociale: String,
    address: Option<String>,
    naf_code: Option<String>,
    contact_email: Option<String>,
    opco_name: Option<String>,
    opco_email: Option<String>,
    source: String,
    created_at: String,
}

impl EntrepriseRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            siret: row.get(1)?,
            raison_sociale: row.get(2)?,
            address: row.get(3)?,
            naf_code: row.get(4)?,
            contact_email: row.get(5)?,
            opco_name: row.get(6)?,
            opco_email: row.get(7)?,
            source: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn decode(self) -> Result<Entreprise, RepositoryError> {
        let source = match self.source.as_str() {
            "registry" => EnrichmentSource::Registry,
            "manual" => EnrichmentSource::Manual,
            other => return Err(corrupt("entreprises.source", other)),
        };
        Ok(Entreprise {
            id: parse("entreprises.id", &self.id)?,
            siret: Siret::parse(&self.siret).map_err(|_| corrupt("entreprises.siret", &self.siret))?,
            raison_sociale: self.raison_sociale,
            address: self.address,
            naf_code: self.naf_code,
            contact_email: self.contact_email,
            opco: self.opco_name.map(|name| OpcoContact {
                name,
                email: self.opco_email,
            }),
            source,
            created_at: parse_timestamp("entreprises.created_at", &self.created_at)?,
        })
    }
}

impl EntrepriseRepository for SqliteStore {
    fn insert_entreprise(&self, entreprise: &Entreprise) -> Result<(), RepositoryError> {
        self.lock()?
            .execute(
                &format!("INSERT INTO entreprises ({ENTREPRISE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
                params![
                    entreprise.id.to_string(),
                    entreprise.siret.as_str(),
                    entreprise.raison_sociale,
                    entreprise.address,
                    entreprise.naf_code,
                    entreprise.contact_email,
                    entreprise.opco.as_ref().map(|opco| opco.name.as_str()),
                    entreprise.opco.as_ref().and_then(|opco| opco.email.as_deref()),
                    entreprise.source.as_str(),
                    timestamp(&entreprise.created_at),
                ],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    fn update_entreprise(&self, entreprise: &Entreprise) -> Result<(), RepositoryError> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE entreprises SET raison_sociale = ?2, address = ?3, naf_code = ?4,
                    contact_email = ?5, opco_name = ?6, opco_email = ?7, source = ?8
                 WHERE id = ?1",
                params![
                    entreprise.id.to_string(),
                    entreprise.raison_sociale,
                    entreprise.address,
                    entreprise.naf_code,
                    entreprise.contact_email,
                    entreprise.opco.as_ref().map(|opco| opco.name.as_str()),
                    entreprise.opco.as_ref().and_then(|opco| opco.email.as_deref()),
                    entreprise.source.as_str(),
                ],
            )
            .map_err(storage_err)?;
        if changed == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    fn find_entreprise(&self, id: EntrepriseId) -> Result<Option<Entreprise>, RepositoryError> {
        let row = self
            .lock()?
            .query_row(
                &format!("SELECT {ENTREPRISE_COLUMNS} FROM entreprises WHERE id = ?1"),
                params![id.to_string()],
                EntrepriseRow::read,
            )
            .optional()
            .map_err(storage_err)?;
        row.map(EntrepriseRow::decode).transpose()
    }

    fn find_entreprise_by_siret(
        &self,
        siret: &Siret,
    ) -> Result<Option<Entreprise>, RepositoryError> {
        let row = self
            .lock()?
            .query_row(
                &format!("SELECT {ENTREPRISE_COLUMNS} FROM entreprises WHERE siret = ?1"),
                params![siret.as_str()],
                EntrepriseRow::read,
            )
            .optional()
            .map_err(storage_err)?;
        row.map(EntrepriseRow::decode).transpose()
    }

    fn list_entreprises(&self) -> Result<Vec<Entreprise>, RepositoryError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ENTREPRISE_COLUMNS} FROM entreprises ORDER BY raison_sociale"
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], EntrepriseRow::read)
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;
        rows.into_iter().map(EntrepriseRow::decode).collect()
    }
}

const DOSSIER_COLUMNS: &str = "id, reference, kind, status, entreprise_id, beneficiary_first_name, beneficiary_last_name, beneficiary_email, consultant_id, hours_planned, hours_completed, start_date, end_date, notes, created_at, updated_at";

struct DossierRow {
    id: String,
    reference: String,
    kind: String,
    status: String,
    entreprise_id: String,
    first_name: String,
    last_name: String,
    email: Option<String>,
    consultant_id: Option<String>,
    hours_planned: i64,
    hours_completed: i64,
    start_date: Option<String>,
    end_date: Option<String>,
    notes: String,
    created_at: String,
    updated_at: String,
}

impl DossierRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            reference: row.get(1)?,
            kind: row.get(2)?,
            status: row.get(3)?,
            entreprise_id: row.get(4)?,
            first_name: row.get(5)?,
            last_name: row.get(6)?,
            email: row.get(7)?,
            consultant_id: row.get(8)?,
            hours_planned: row.get(9)?,
            hours_completed: row.get(10)?,
            start_date: row.get(11)?,
            end_date: row.get(12)?,
            notes: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }

    fn decode(self) -> Result<Dossier, RepositoryError> {
        Ok(Dossier {
            id: parse("dossiers.id", &self.id)?,
            reference: self.reference,
            kind: parse("dossiers.kind", &self.kind)?,
            status: parse("dossiers.status", &self.status)?,
            entreprise_id: parse("dossiers.entreprise_id", &self.entreprise_id)?,
            beneficiary: Beneficiary {
                first_name: self.first_name,
                last_name: self.last_name,
                email: self.email,
            },
            consultant_id: parse_optional("dossiers.consultant_id", self.consultant_id)?,
            hours_planned: to_u32("dossiers.hours_planned", self.hours_planned)?,
            hours_completed: to_u32("dossiers.hours_completed", self.hours_completed)?,
            start_date: parse_date("dossiers.start_date", self.start_date)?,
            end_date: parse_date("dossiers.end_date", self.end_date)?,
            notes: self.notes,
            created_at: parse_timestamp("dossiers.created_at", &self.created_at)?,
            updated_at: parse_timestamp("dossiers.updated_at", &self.updated_at)?,
        })
    }
}

fn insert_history(tx: &Transaction<'_>, entry: &HistoriqueEntry) -> Result<(), RepositoryError> {
    tx.execute(
        "INSERT INTO historique (id, dossier_id, actor_id, action, old_value, new_value, comment, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry.id.to_string(),
            entry.dossier_id.to_string(),
            entry.actor_id.to_string(),
            entry.action.as_str(),
            entry.old_value,
            entry.new_value,
            entry.comment,
            timestamp(&entry.recorded_at),
        ],
    )
    .map_err(storage_err)?;
    Ok(())
}

/// Writes the mutable dossier columns if the stored status still matches.
fn write_dossier(
    tx: &Transaction<'_>,
    dossier: &Dossier,
    expected_status: DossierStatus,
) -> Result<(), RepositoryError> {
    let changed = tx
        .execute(
            "UPDATE dossiers SET status = ?2, consultant_id = ?3, hours_planned = ?4,
                hours_completed = ?5, start_date = ?6, end_date = ?7, notes = ?8,
                beneficiary_email = ?9, updated_at = ?10
             WHERE id = ?1 AND status = ?11",
            params![
                dossier.id.to_string(),
                dossier.status.as_str(),
                dossier.consultant_id.map(|id| id.to_string()),
                i64::from(dossier.hours_planned),
                i64::from(dossier.hours_completed),
                dossier.start_date.map(|date| date.to_string()),
                dossier.end_date.map(|date| date.to_string()),
                dossier.notes,
                dossier.beneficiary.email,
                timestamp(&dossier.updated_at),
                expected_status.as_str(),
            ],
        )
        .map_err(storage_err)?;

    if changed == 1 {
        return Ok(());
    }

    let exists: bool = tx
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM dossiers WHERE id = ?1)",
            params![dossier.id.to_string()],
            |row| row.get(0),
        )
        .map_err(storage_err)?;
    Err(if exists {
        RepositoryError::Stale
    } else {
        RepositoryError::NotFound
    })
}

impl DossierRepository for SqliteStore {
    fn insert_dossier(
        &self,
        dossier: &Dossier,
        created: &HistoriqueEntry,
    ) -> Result<(), RepositoryError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage_err)?;
        tx.execute(
            &format!(
                "INSERT INTO dossiers ({DOSSIER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
            ),
            params![
                dossier.id.to_string(),
                dossier.reference,
                dossier.kind.as_str(),
                dossier.status.as_str(),
                dossier.entreprise_id.to_string(),
                dossier.beneficiary.first_name,
                dossier.beneficiary.last_name,
                dossier.beneficiary.email,
                dossier.consultant_id.map(|id| id.to_string()),
                i64::from(dossier.hours_planned),
                i64::from(dossier.hours_completed),
                dossier.start_date.map(|date| date.to_string()),
                dossier.end_date.map(|date| date.to_string()),
                dossier.notes,
                timestamp(&dossier.created_at),
                timestamp(&dossier.updated_at),
            ],
        )
        .map_err(storage_err)?;
        insert_history(&tx, created)?;
        tx.commit().map_err(storage_err)
    }

    fn update_dossier(
        &self,
        dossier: &Dossier,
        expected_status: DossierStatus,
        entry: &HistoriqueEntry,
    ) -> Result<(), RepositoryError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage_err)?;
        write_dossier(&tx, dossier, expected_status)?;
        insert_history(&tx, entry)?;
        tx.commit().map_err(storage_err)
    }

    fn find_dossier(&self, id: DossierId) -> Result<Option<Dossier>, RepositoryError> {
        let row = self
            .lock()?
            .query_row(
                &format!("SELECT {DOSSIER_COLUMNS} FROM dossiers WHERE id = ?1"),
                params![id.to_string()],
                DossierRow::read,
            )
            .optional()
            .map_err(storage_err)?;
        row.map(DossierRow::decode).transpose()
    }

    fn list_dossiers(&self, filter: &DossierFilter) -> Result<Vec<Dossier>, RepositoryError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {DOSSIER_COLUMNS} FROM dossiers
                 WHERE (?1 IS NULL OR status = ?1)
                   AND (?2 IS NULL OR kind = ?2)
                   AND (?3 IS NULL OR entreprise_id = ?3)
                   AND (?4 IS NULL OR consultant_id = ?4)
                 ORDER BY created_at DESC, reference DESC"
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(
                params![
                    filter.status.map(DossierStatus::as_str),
                    filter.kind.map(|kind| kind.as_str()),
                    filter.entreprise_id.map(|id| id.to_string()),
                    filter.consultant_id.map(|id| id.to_string()),
                ],
                DossierRow::read,
            )
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;
        rows.into_iter().map(DossierRow::decode).collect()
    }

    fn history(&self, id: DossierId) -> Result<Vec<HistoriqueEntry>, RepositoryError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, dossier_id, actor_id, action, old_value, new_value, comment, recorded_at
                 FROM historique WHERE dossier_id = ?1 ORDER BY seq",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;

        rows.into_iter()
            .map(
                |(id, dossier_id, actor_id, action, old_value, new_value, comment, recorded_at)| {
                    Ok(HistoriqueEntry {
                        id: parse("historique.id", &id)?,
                        dossier_id: parse("historique.dossier_id", &dossier_id)?,
                        actor_id: parse("historique.actor_id", &actor_id)?,
                        action: parse("historique.action", &action)?,
                        old_value,
                        new_value,
                        comment,
                        recorded_at: parse_timestamp("historique.recorded_at", &recorded_at)?,
                    })
                },
            )
            .collect()
    }
}

impl DocumentRepository for SqliteStore {
    fn insert_document(
        &self,
        document: &Document,
        entry: &HistoriqueEntry,
    ) -> Result<(), RepositoryError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage_err)?;
        tx.execute(
            "INSERT INTO documents (id, dossier_id, name, storage_key, url, kind, content_type, size_bytes, uploaded_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                document.id.to_string(),
                document.dossier_id.to_string(),
                document.name,
                document.storage_key,
                document.url,
                document.kind.as_str(),
                document.content_type,
                i64::try_from(document.size_bytes).unwrap_or(i64::MAX),
                document.uploaded_by.to_string(),
                timestamp(&document.created_at),
            ],
        )
        .map_err(storage_err)?;
        insert_history(&tx, entry)?;
        tx.commit().map_err(storage_err)
    }

    fn list_documents(&self, dossier_id: DossierId) -> Result<Vec<Document>, RepositoryError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, dossier_id, name, storage_key, url, kind, content_type, size_bytes, uploaded_by, created_at
                 FROM documents WHERE dossier_id = ?1 ORDER BY created_at",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![dossier_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                ))
            })
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;

        rows.into_iter()
            .map(
                |(id, dossier_id, name, storage_key, url, kind, content_type, size, uploaded_by, created_at)| {
                    Ok(Document {
                        id: parse("documents.id", &id)?,
                        dossier_id: parse("documents.dossier_id", &dossier_id)?,
                        name,
                        storage_key,
                        url,
                        kind: DocumentKind::parse(&kind).ok_or_else(|| corrupt("documents.kind", &kind))?,
                        content_type,
                        size_bytes: u64::try_from(size)
                            .map_err(|_| corrupt("documents.size_bytes", &size.to_string()))?,
                        uploaded_by: parse("documents.uploaded_by", &uploaded_by)?,
                        created_at: parse_timestamp("documents.created_at", &created_at)?,
                    })
                },
            )
            .collect()
    }
}

const FACTURE_COLUMNS: &str =
    "id, dossier_id, year, sequence, amount_ht_cents, vat_rate_bp, due_date, status, issued_at, paid_at";

struct FactureRow {
    id: String,
    dossier_id: String,
    year: i32,
    sequence: i64,
    amount_ht_cents: i64,
    vat_rate_bp: i64,
    due_date: String,
    status: String,
    issued_at: String,
    paid_at: Option<String>,
}

impl FactureRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            dossier_id: row.get(1)?,
            year: row.get(2)?,
            sequence: row.get(3)?,
            amount_ht_cents: row.get(4)?,
            vat_rate_bp: row.get(5)?,
            due_date: row.get(6)?,
            status: row.get(7)?,
            issued_at: row.get(8)?,
            paid_at: row.get(9)?,
        })
    }

    fn decode(self) -> Result<Facture, RepositoryError> {
        Ok(Facture {
            id: parse("factures.id", &self.id)?,
            dossier_id: parse("factures.dossier_id", &self.dossier_id)?,
            number: FactureNumber {
                year: self.year,
                sequence: to_u32("factures.sequence", self.sequence)?,
            },
            amount_ht_cents: self.amount_ht_cents,
            vat_rate_bp: to_u32("factures.vat_rate_bp", self.vat_rate_bp)?,
            due_date: parse_date("factures.due_date", Some(self.due_date))?
                .ok_or_else(|| corrupt("factures.due_date", ""))?,
            status: parse("factures.status", &self.status)?,
            issued_at: parse_timestamp("factures.issued_at", &self.issued_at)?,
            paid_at: parse_optional_timestamp("factures.paid_at", self.paid_at)?,
        })
    }
}

impl FactureRepository for SqliteStore {
    fn insert_facture(
        &self,
        facture: &Facture,
        dossier: &Dossier,
        expected_status: DossierStatus,
        entry: &HistoriqueEntry,
    ) -> Result<(), RepositoryError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage_err)?;
        write_dossier(&tx, dossier, expected_status)?;
        tx.execute(
            &format!("INSERT INTO factures ({FACTURE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
            params![
                facture.id.to_string(),
                facture.dossier_id.to_string(),
                facture.number.year,
                i64::from(facture.number.sequence),
                facture.amount_ht_cents,
                i64::from(facture.vat_rate_bp),
                facture.due_date.to_string(),
                facture.status.as_str(),
                timestamp(&facture.issued_at),
                facture.paid_at.as_ref().map(timestamp),
            ],
        )
        .map_err(storage_err)?;
        insert_history(&tx, entry)?;
        tx.commit().map_err(storage_err)
    }

    fn update_facture(
        &self,
        facture: &Facture,
        entry: &HistoriqueEntry,
    ) -> Result<(), RepositoryError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage_err)?;
        let changed = tx
            .execute(
                "UPDATE factures SET status = ?2, paid_at = ?3 WHERE id = ?1",
                params![
                    facture.id.to_string(),
                    facture.status.as_str(),
                    facture.paid_at.as_ref().map(timestamp),
                ],
            )
            .map_err(storage_err)?;
        if changed == 0 {
            return Err(RepositoryError::NotFound);
        }
        insert_history(&tx, entry)?;
        tx.commit().map_err(storage_err)
    }

    fn find_facture(&self, id: FactureId) -> Result<Option<Facture>, RepositoryError> {
        let row = self
            .lock()?
            .query_row(
                &format!("SELECT {FACTURE_COLUMNS} FROM factures WHERE id = ?1"),
                params![id.to_string()],
                FactureRow::read,
            )
            .optional()
            .map_err(storage_err)?;
        row.map(FactureRow::decode).transpose()
    }

    fn list_factures(&self, dossier_id: DossierId) -> Result<Vec<Facture>, RepositoryError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {FACTURE_COLUMNS} FROM factures WHERE dossier_id = ?1 ORDER BY year, sequence"
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![dossier_id.to_string()], FactureRow::read)
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;
        rows.into_iter().map(FactureRow::decode).collect()
    }
}

impl EmailLogRepository for SqliteStore {
    fn insert_email(&self, email: &EmailLog) -> Result<(), RepositoryError> {
        self.lock()?
            .execute(
                "INSERT INTO emails (id, dossier_id, recipient, template, subject, body, status, error, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    email.id.to_string(),
                    email.dossier_id.map(|id| id.to_string()),
                    email.recipient,
                    email.template,
                    email.subject,
                    email.body,
                    email.status.as_str(),
                    email.error,
                    timestamp(&email.created_at),
                ],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    fn list_emails(&self, dossier_id: DossierId) -> Result<Vec<EmailLog>, RepositoryError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, dossier_id, recipient, template, subject, body, status, error, created_at
                 FROM emails WHERE dossier_id = ?1 ORDER BY created_at",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![dossier_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;

        rows.into_iter()
            .map(
                |(id, dossier_id, recipient, template, subject, body, status, error, created_at)| {
                    let status = match status.as_str() {
                        "sent" => EmailStatus::Sent,
                        "failed" => EmailStatus::Failed,
                        other => return Err(corrupt("emails.status", other)),
                    };
                    Ok(EmailLog {
                        id: parse("emails.id", &id)?,
                        dossier_id: parse_optional("emails.dossier_id", dossier_id)?,
                        recipient,
                        template,
                        subject,
                        body,
                        status,
                        error,
                        created_at: parse_timestamp("emails.created_at", &created_at)?,
                    })
                },
            )
            .collect()
    }
}

const REFRESH_COLUMNS: &str =
    "id, user_id, token_hash, family_id, expires_at, created_at, revoked_at, replaced_by";

struct RefreshRow {
    id: String,
    user_id: String,
    token_hash: String,
    family_id: String,
    expires_at: String,
    created_at: String,
    revoked_at: Option<String>,
    replaced_by: Option<String>,
}

impl RefreshRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            token_hash: row.get(2)?,
            family_id: row.get(3)?,
            expires_at: row.get(4)?,
            created_at: row.get(5)?,
            revoked_at: row.get(6)?,
            replaced_by: row.get(7)?,
        })
    }

    fn decode(self) -> Result<RefreshTokenRecord, RepositoryError> {
        Ok(RefreshTokenRecord {
            id: parse("refresh_tokens.id", &self.id)?,
            user_id: parse("refresh_tokens.user_id", &self.user_id)?,
            token_hash: self.token_hash,
            family_id: parse::<Uuid>("refresh_tokens.family_id", &self.family_id)?,
            expires_at: parse_timestamp("refresh_tokens.expires_at", &self.expires_at)?,
            created_at: parse_timestamp("refresh_tokens.created_at", &self.created_at)?,
            revoked_at: parse_optional_timestamp("refresh_tokens.revoked_at", self.revoked_at)?,
            replaced_by: parse_optional::<RefreshTokenId>(
                "refresh_tokens.replaced_by",
                self.replaced_by,
            )?,
        })
    }
}

fn insert_refresh(conn: &Connection, record: &RefreshTokenRecord) -> Result<(), RepositoryError> {
    conn.execute(
        &format!("INSERT INTO refresh_tokens ({REFRESH_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
        params![
            record.id.to_string(),
            record.user_id.to_string(),
            record.token_hash,
            record.family_id.to_string(),
            timestamp(&record.expires_at),
            timestamp(&record.created_at),
            record.revoked_at.as_ref().map(timestamp),
            record.replaced_by.map(|id| id.to_string()),
        ],
    )
    .map_err(storage_err)?;
    Ok(())
}

impl RefreshTokenRepository for SqliteStore {
    fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), RepositoryError> {
        insert_refresh(&*self.lock()?, record)
    }

    fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, RepositoryError> {
        let row = self
            .lock()?
            .query_row(
                &format!("SELECT {REFRESH_COLUMNS} FROM refresh_tokens WHERE token_hash = ?1"),
                params![token_hash],
                RefreshRow::read,
            )
            .optional()
            .map_err(storage_err)?;
        row.map(RefreshRow::decode).transpose()
    }

    fn rotate_refresh_token(
        &self,
        current: RefreshTokenId,
        replacement: &RefreshTokenRecord,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage_err)?;
        let changed = tx
            .execute(
                "UPDATE refresh_tokens SET revoked_at = ?2, replaced_by = ?3
                 WHERE id = ?1 AND revoked_at IS NULL",
                params![
                    current.to_string(),
                    timestamp(&at),
                    replacement.id.to_string()
                ],
            )
            .map_err(storage_err)?;
        if changed == 0 {
            return Err(RepositoryError::Stale);
        }
        insert_refresh(&tx, replacement)?;
        tx.commit().map_err(storage_err)
    }

    fn revoke_family(&self, family_id: Uuid, at: DateTime<Utc>) -> Result<usize, RepositoryError> {
        self.lock()?
            .execute(
                "UPDATE refresh_tokens SET revoked_at = ?2 WHERE family_id = ?1 AND revoked_at IS NULL",
                params![family_id.to_string(), timestamp(&at)],
            )
            .map_err(storage_err)
    }
}

impl SequenceRepository for SqliteStore {
    fn next_sequence(&self, scope: SequenceScope, year: i32) -> Result<u32, RepositoryError> {
        let value: i64 = self
            .lock()?
            .query_row(
                "INSERT INTO sequences (scope, year, value) VALUES (?1, ?2, 1)
                 ON CONFLICT(scope, year) DO UPDATE SET value = value + 1
                 RETURNING value",
                params![scope.as_str(), year],
                |row| row.get(0),
            )
            .map_err(storage_err)?;
        to_u32("sequences.value", value)
    }
}
