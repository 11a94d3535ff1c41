//! Film records and merge outcomes
//!
//! - `RawFilmRecord`: what the extractor produces for one catalog card
//! - `FilmRecord`: a stored film with bookkeeping timestamps
//! - `IdentityKey`: the deduplication key (see [`identity`])

mod identity;

pub use identity::{normalize_text, IdentityKey};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether a film is already out or announced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseStatus {
    Released,
    Upcoming,
}

impl ReleaseStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Released => "released",
            Self::Upcoming => "upcoming",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "released" => Some(Self::Released),
            "upcoming" => Some(Self::Upcoming),
            _ => None,
        }
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

impl FromStr for ReleaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_string(&s.trim().to_lowercase())
            .ok_or_else(|| format!("unknown release status '{}'", s))
    }
}

/// One film card as extracted from a catalog page
///
/// Only `title` is required; every other field is independently optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFilmRecord {
    pub spine_number: Option<u32>,
    pub title: String,
    pub director: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub release_status: ReleaseStatus,
    pub format: Option<String>,
    pub price: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub cover_art_url: Option<String>,
    pub special_features: Option<String>,
}

impl RawFilmRecord {
    /// Creates a record with only the required fields set
    pub fn new(title: impl Into<String>, release_status: ReleaseStatus) -> Self {
        Self {
            spine_number: None,
            title: title.into(),
            director: None,
            release_date: None,
            release_status,
            format: None,
            price: None,
            description: None,
            url: None,
            cover_art_url: None,
            special_features: None,
        }
    }

    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::for_record(self.spine_number, &self.title, self.director.as_deref())
    }
}

/// A film as held by the repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilmRecord {
    pub identity_key: IdentityKey,
    pub spine_number: Option<u32>,
    pub title: String,
    pub director: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub release_status: ReleaseStatus,
    pub format: Option<String>,
    pub price: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub cover_art_url: Option<String>,
    pub special_features: Option<String>,
    /// Set once, on first insert
    pub created_at: DateTime<Utc>,
    /// Watermark: refreshed on every merge, changed or not
    pub updated_at: DateTime<Utc>,
}

impl FilmRecord {
    /// Builds a new stored record; both timestamps are `now`
    pub fn from_raw(raw: &RawFilmRecord, now: DateTime<Utc>) -> Self {
        Self {
            identity_key: raw.identity_key(),
            spine_number: raw.spine_number,
            title: raw.title.clone(),
            director: raw.director.clone(),
            release_date: raw.release_date,
            release_status: raw.release_status,
            format: raw.format.clone(),
            price: raw.price.clone(),
            description: raw.description.clone(),
            url: raw.url.clone(),
            cover_art_url: raw.cover_art_url.clone(),
            special_features: raw.special_features.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrites fields whose incoming value is present and different
    ///
    /// Absent incoming values never erase stored ones. Gaining a spine
    /// number re-keys the record. `updated_at` is always set to `now`.
    /// Returns the names of the fields that changed.
    pub fn merge_from(&mut self, incoming: &RawFilmRecord, now: DateTime<Utc>) -> Vec<&'static str> {
        let mut changed = Vec::new();

        if let Some(spine) = incoming.spine_number {
            if self.spine_number != Some(spine) {
                self.spine_number = Some(spine);
                self.identity_key = IdentityKey::Spine(spine);
                changed.push("spine_number");
            }
        }

        if !incoming.title.is_empty() && self.title != incoming.title {
            self.title = incoming.title.clone();
            changed.push("title");
        }

        if self.release_status != incoming.release_status {
            self.release_status = incoming.release_status;
            changed.push("release_status");
        }

        if merge_value(&mut self.release_date, &incoming.release_date) {
            changed.push("release_date");
        }

        let text_fields = [
            ("director", &mut self.director, &incoming.director),
            ("format", &mut self.format, &incoming.format),
            ("price", &mut self.price, &incoming.price),
            ("description", &mut self.description, &incoming.description),
            ("url", &mut self.url, &incoming.url),
            ("cover_art_url", &mut self.cover_art_url, &incoming.cover_art_url),
            (
                "special_features",
                &mut self.special_features,
                &incoming.special_features,
            ),
        ];
        for (name, stored, value) in text_fields {
            if merge_value(stored, value) {
                changed.push(name);
            }
        }

        self.updated_at = now;
        changed
    }
}

fn merge_value<T: Clone + PartialEq>(stored: &mut Option<T>, incoming: &Option<T>) -> bool {
    match incoming {
        Some(value) if stored.as_ref() != Some(value) => {
            *stored = Some(value.clone());
            true
        }
        _ => false,
    }
}

/// Result of merging one record into the repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No record with this identity existed
    Created,

    /// At least one stored field changed; names the fields
    Updated { changed_fields: Vec<&'static str> },

    /// Values matched; only the watermark moved
    Unchanged,
}

impl MergeOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated { .. } => "updated",
            Self::Unchanged => "unchanged",
        }
    }
}
