//! SQLite repository implementation
//!
//! This module provides a SQLite-based implementation of the Repository trait.

use crate::film::{
    normalize_text, FilmRecord, IdentityKey, MergeOutcome, RawFilmRecord, ReleaseStatus,
};
use crate::state::{IngestionRun, RunStatus, TriggerSource};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Repository, StorageError, StorageResult};
use crate::storage::FilmFilter;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const FILM_SELECT: &str = "SELECT spine_number, title, title_norm, director, director_norm, \
     release_date, release_status, format, price, description, url, cover_art_url, \
     special_features, created_at, updated_at FROM films";

const RUN_SELECT: &str = "SELECT id, trigger_source, started_at, finished_at, status, \
     films_seen, films_created, films_updated, pages_failed, error FROM runs";

const LISTING_ORDER: &str = "ORDER BY release_date IS NULL, release_date DESC, \
     spine_number IS NULL, spine_number ASC, identity_key ASC";

/// SQLite repository backend
///
/// The connection sits behind a mutex, so every upsert is one serialized
/// transaction and readers never observe a half-merged record.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Opens or creates the database file at `path`
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        // Readers from the API stay unblocked while a run writes
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Database("connection lock poisoned".to_string()))
    }
}

impl Repository for SqliteRepository {
    // ===== Films =====

    fn upsert(&self, record: &RawFilmRecord) -> StorageResult<MergeOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now();
        let key = record.identity_key();

        let existing = match find_film(&tx, &key)? {
            Some(found) => Some(found),
            None => find_reconcile_candidate(&tx, record)?,
        };

        let outcome = match existing {
            None => {
                insert_film(&tx, &FilmRecord::from_raw(record, now))?;
                MergeOutcome::Created
            }
            Some(mut stored) => {
                let previous_key = stored.identity_key.to_db_string();
                let changed_fields = stored.merge_from(record, now);
                update_film(&tx, &previous_key, &stored)?;
                if changed_fields.is_empty() {
                    MergeOutcome::Unchanged
                } else {
                    MergeOutcome::Updated { changed_fields }
                }
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn get(&self, key: &IdentityKey) -> StorageResult<Option<FilmRecord>> {
        let conn = self.lock()?;
        find_film(&conn, key)
    }

    fn list(&self, filter: &FilmFilter) -> StorageResult<Vec<FilmRecord>> {
        let (where_sql, mut values) = where_clause(filter);
        let limit = filter.limit.map(to_sql_int).unwrap_or(-1);
        values.push(Value::Integer(limit));
        values.push(Value::Integer(to_sql_int(filter.offset)));

        let sql = format!(
            "{}{} {} LIMIT ? OFFSET ?",
            FILM_SELECT, where_sql, LISTING_ORDER
        );

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let films = stmt
            .query_map(params_from_iter(values.iter()), film_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(films)
    }

    fn count_matching(&self, filter: &FilmFilter) -> StorageResult<u64> {
        let (where_sql, values) = where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM films{}", where_sql);

        let conn = self.lock()?;
        let count: i64 = conn.query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
        Ok(from_sql_int(count))
    }

    fn count(&self) -> StorageResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM films", [], |row| row.get(0))?;
        Ok(from_sql_int(count))
    }

    fn count_by_status(&self, status: ReleaseStatus) -> StorageResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM films WHERE release_status = ?1",
            params![status.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(from_sql_int(count))
    }

    fn count_released_since(&self, since: NaiveDate) -> StorageResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM films WHERE release_status = ?1 AND release_date >= ?2",
            params![ReleaseStatus::Released.to_db_string(), format_date(since)],
            |row| row.get(0),
        )?;
        Ok(from_sql_int(count))
    }

    // ===== Run history =====

    fn record_run(&self, run: &IngestionRun) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO runs (id, trigger_source, started_at, finished_at, status,
             films_seen, films_created, films_updated, pages_failed, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                to_sql_int(run.id),
                run.trigger.to_db_string(),
                format_timestamp(run.started_at),
                run.finished_at.map(format_timestamp),
                run.status.to_db_string(),
                to_sql_int(run.films_seen),
                to_sql_int(run.films_created),
                to_sql_int(run.films_updated),
                to_sql_int(run.pages_failed),
                run.error,
            ],
        )?;
        Ok(())
    }

    fn latest_run(&self) -> StorageResult<Option<IngestionRun>> {
        let conn = self.lock()?;
        let sql = format!("{} ORDER BY id DESC LIMIT 1", RUN_SELECT);
        let run = conn.query_row(&sql, [], run_from_row).optional()?;
        Ok(run)
    }
}

fn find_film(conn: &Connection, key: &IdentityKey) -> StorageResult<Option<FilmRecord>> {
    let sql = format!("{} WHERE identity_key = ?1", FILM_SELECT);
    let film = conn
        .query_row(&sql, params![key.to_db_string()], film_from_row)
        .optional()?;
    Ok(film)
}

/// Finds the single stored record that a key miss should merge into
///
/// A record with a spine number may claim one spine-less record with the
/// same title and director; a spine-less record may fold into one spine-keyed
/// record. An empty director on either side matches any director. Zero or
/// several candidates means no reconciliation.
fn find_reconcile_candidate(
    conn: &Connection,
    record: &RawFilmRecord,
) -> StorageResult<Option<FilmRecord>> {
    let spine_clause = if record.spine_number.is_some() {
        "spine_number IS NULL"
    } else {
        "spine_number IS NOT NULL"
    };
    let sql = format!(
        "{} WHERE {} AND title_norm = ?1 \
         AND (director_norm = ?2 OR director_norm = '' OR ?2 = '') LIMIT 2",
        FILM_SELECT, spine_clause
    );

    let title_norm = normalize_text(&record.title);
    let director_norm = record
        .director
        .as_deref()
        .map(normalize_text)
        .unwrap_or_default();

    let mut stmt = conn.prepare(&sql)?;
    let mut candidates = stmt
        .query_map(params![title_norm, director_norm], film_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    if candidates.len() == 1 {
        Ok(candidates.pop())
    } else {
        Ok(None)
    }
}

fn insert_film(conn: &Connection, film: &FilmRecord) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO films (identity_key, spine_number, title, title_norm, director,
         director_norm, release_date, release_status, format, price, description, url,
         cover_art_url, special_features, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            film.identity_key.to_db_string(),
            film.spine_number,
            film.title,
            normalize_text(&film.title),
            film.director,
            film.director.as_deref().map(normalize_text).unwrap_or_default(),
            film.release_date.map(format_date),
            film.release_status.to_db_string(),
            film.format,
            film.price,
            film.description,
            film.url,
            film.cover_art_url,
            film.special_features,
            format_timestamp(film.created_at),
            format_timestamp(film.updated_at),
        ],
    )?;
    Ok(())
}

fn update_film(conn: &Connection, previous_key: &str, film: &FilmRecord) -> StorageResult<()> {
    conn.execute(
        "UPDATE films SET identity_key = ?1, spine_number = ?2, title = ?3, title_norm = ?4,
         director = ?5, director_norm = ?6, release_date = ?7, release_status = ?8,
         format = ?9, price = ?10, description = ?11, url = ?12, cover_art_url = ?13,
         special_features = ?14, updated_at = ?15
         WHERE identity_key = ?16",
        params![
            film.identity_key.to_db_string(),
            film.spine_number,
            film.title,
            normalize_text(&film.title),
            film.director,
            film.director.as_deref().map(normalize_text).unwrap_or_default(),
            film.release_date.map(format_date),
            film.release_status.to_db_string(),
            film.format,
            film.price,
            film.description,
            film.url,
            film.cover_art_url,
            film.special_features,
            format_timestamp(film.updated_at),
            previous_key,
        ],
    )?;
    Ok(())
}

/// Builds ` WHERE ...` (or an empty string) plus its positional values
fn where_clause(filter: &FilmFilter) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(status) = filter.release_status {
        clauses.push("release_status = ?");
        values.push(Value::Text(status.to_db_string().to_string()));
    }

    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", escape_like(&normalize_text(search)));
        clauses.push("(title_norm LIKE ? ESCAPE '\\' OR director_norm LIKE ? ESCAPE '\\')");
        values.push(Value::Text(pattern.clone()));
        values.push(Value::Text(pattern));
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn film_from_row(row: &Row<'_>) -> rusqlite::Result<FilmRecord> {
    let spine_number: Option<u32> = row.get(0)?;
    let identity_key = match spine_number {
        Some(spine) => IdentityKey::Spine(spine),
        None => IdentityKey::TitleDirector {
            title: row.get(2)?,
            director: row.get(4)?,
        },
    };

    let status: String = row.get(6)?;
    let release_status = ReleaseStatus::from_db_string(&status)
        .ok_or_else(|| conversion_error(6, format!("unknown release status '{}'", status)))?;

    Ok(FilmRecord {
        identity_key,
        spine_number,
        title: row.get(1)?,
        director: row.get(3)?,
        release_date: row
            .get::<_, Option<String>>(5)?
            .map(|date| parse_date(5, &date))
            .transpose()?,
        release_status,
        format: row.get(7)?,
        price: row.get(8)?,
        description: row.get(9)?,
        url: row.get(10)?,
        cover_art_url: row.get(11)?,
        special_features: row.get(12)?,
        created_at: parse_timestamp(13, &row.get::<_, String>(13)?)?,
        updated_at: parse_timestamp(14, &row.get::<_, String>(14)?)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<IngestionRun> {
    let trigger: String = row.get(1)?;
    let status: String = row.get(4)?;

    Ok(IngestionRun {
        id: from_sql_int(row.get(0)?),
        trigger: TriggerSource::from_db_string(&trigger)
            .ok_or_else(|| conversion_error(1, format!("unknown trigger '{}'", trigger)))?,
        started_at: parse_timestamp(2, &row.get::<_, String>(2)?)?,
        finished_at: row
            .get::<_, Option<String>>(3)?
            .map(|ts| parse_timestamp(3, &ts))
            .transpose()?,
        status: RunStatus::from_db_string(&status)
            .ok_or_else(|| conversion_error(4, format!("unknown run status '{}'", status)))?,
        films_seen: from_sql_int(row.get(5)?),
        films_created: from_sql_int(row.get(6)?),
        films_updated: from_sql_int(row.get(7)?),
        pages_failed: from_sql_int(row.get(8)?),
        error: row.get(9)?,
    })
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_date(idx: usize, text: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|e| conversion_error(idx, e.to_string()))
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
