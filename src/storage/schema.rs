//! Database schema definitions
//!
//! Timestamps are RFC 3339 text and release dates are `YYYY-MM-DD`, so text
//! ordering matches chronological ordering.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Catalog snapshot, one row per identity key
CREATE TABLE IF NOT EXISTS films (
    identity_key TEXT PRIMARY KEY,
    spine_number INTEGER UNIQUE,
    title TEXT NOT NULL,
    title_norm TEXT NOT NULL,
    director TEXT,
    director_norm TEXT NOT NULL DEFAULT '',
    release_date TEXT,
    release_status TEXT NOT NULL,
    format TEXT,
    price TEXT,
    description TEXT,
    url TEXT,
    cover_art_url TEXT,
    special_features TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_films_release_date ON films(release_date);
CREATE INDEX IF NOT EXISTS idx_films_release_status ON films(release_status);
CREATE INDEX IF NOT EXISTS idx_films_title_director ON films(title_norm, director_norm);

-- Finished ingestion runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY,
    trigger_source TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    status TEXT NOT NULL,
    films_seen INTEGER NOT NULL DEFAULT 0,
    films_created INTEGER NOT NULL DEFAULT 0,
    films_updated INTEGER NOT NULL DEFAULT 0,
    pages_failed INTEGER NOT NULL DEFAULT 0,
    error TEXT
);
"#;

/// Initializes the database schema
///
/// Safe to call on an existing database.
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
