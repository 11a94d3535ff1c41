//! Identity keys for catalog entries
//!
//! Two extracted cards describe the same film when their identity keys are
//! equal. The spine number wins when present; otherwise the key falls back to
//! the normalized title and director.

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// The value used to decide whether two records refer to the same film
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    /// Catalog spine number
    Spine(u32),

    /// Normalized `(title, director)`; director is empty when unknown
    TitleDirector { title: String, director: String },
}

impl IdentityKey {
    /// Computes the key for a record's identifying fields
    ///
    /// # Examples
    ///
    /// ```
    /// use spine_tracker::film::IdentityKey;
    ///
    /// let key = IdentityKey::for_record(Some(2), "Seven Samurai", None);
    /// assert_eq!(key.to_string(), "spine:2");
    ///
    /// let key = IdentityKey::for_record(None, "  Seven   Samurai ", Some("Akira Kurosawa"));
    /// assert_eq!(key.to_string(), "title:seven samurai|akira kurosawa");
    /// ```
    pub fn for_record(spine_number: Option<u32>, title: &str, director: Option<&str>) -> Self {
        match spine_number {
            Some(spine) => Self::Spine(spine),
            None => Self::fallback(title, director),
        }
    }

    /// The title/director key, regardless of spine number
    pub fn fallback(title: &str, director: Option<&str>) -> Self {
        Self::TitleDirector {
            title: normalize_text(title),
            director: director.map(normalize_text).unwrap_or_default(),
        }
    }

    /// Returns true for spine-number keys
    pub fn is_spine(&self) -> bool {
        matches!(self, Self::Spine(_))
    }

    /// String form stored in the `identity_key` column
    pub fn to_db_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spine(spine) => write!(f, "spine:{}", spine),
            Self::TitleDirector { title, director } => write!(f, "title:{}|{}", title, director),
        }
    }
}

impl FromStr for IdentityKey {
    type Err = String;

    /// Parses the string form; title and director are normalized again
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(spine) = s.strip_prefix("spine:") {
            return spine
                .trim()
                .parse()
                .map(Self::Spine)
                .map_err(|_| format!("invalid spine number in key '{}'", s));
        }

        let rest = s
            .strip_prefix("title:")
            .ok_or_else(|| format!("unknown identity key '{}'", s))?;
        let (title, director) = rest.rsplit_once('|').unwrap_or((rest, ""));
        let title = normalize_text(title);
        if title.is_empty() {
            return Err(format!("identity key '{}' has no title", s));
        }
        Ok(Self::TitleDirector {
            title,
            director: normalize_text(director),
        })
    }
}

impl Serialize for IdentityKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Lowercases, trims, and collapses internal whitespace
///
/// # Examples
///
/// ```
/// use spine_tracker::film::normalize_text;
///
/// assert_eq!(normalize_text("  Ugetsu \n Monogatari "), "ugetsu monogatari");
/// ```
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
