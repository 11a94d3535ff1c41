//! Flat-file export of the catalog snapshot

use crate::film::FilmRecord;
use crate::output::{OutputError, OutputResult};
use crate::storage::Repository;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const TSV_COLUMNS: &[&str] = &[
    "identity_key",
    "spine_number",
    "title",
    "director",
    "release_date",
    "release_status",
    "format",
    "price",
    "description",
    "url",
    "cover_art_url",
    "special_features",
    "created_at",
    "updated_at",
];

/// Export file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// JSON array of film records
    #[default]
    Json,
    /// Tab-separated values with a header row
    Tsv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Tsv => "tsv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = OutputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "tsv" => Ok(Self::Tsv),
            other => Err(OutputError::UnknownFormat(other.to_string())),
        }
    }
}

/// What an export wrote
#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    /// File name within the export directory
    pub filename: String,
    pub total_films: usize,
    #[serde(skip)]
    pub path: PathBuf,
}

/// Writes every stored film to a new timestamped file in `dir`
///
/// The file is named `films_<YYYYMMDD_HHMMSS>.<ext>`; an existing file is
/// never overwritten.
pub fn export_films(
    repository: &dyn Repository,
    dir: &Path,
    format: ExportFormat,
) -> OutputResult<ExportSummary> {
    let films = repository.all()?;
    fs::create_dir_all(dir)?;

    let stem = format!("films_{}", Utc::now().format("%Y%m%d_%H%M%S"));
    let (path, file) = create_unique(dir, &stem, format.extension())?;
    let mut writer = BufWriter::new(file);

    match format {
        ExportFormat::Json => serde_json::to_writer_pretty(&mut writer, &films)?,
        ExportFormat::Tsv => write_tsv(&mut writer, &films)?,
    }
    writer.flush()?;

    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    tracing::info!(file = %path.display(), films = films.len(), "Exported catalog");

    Ok(ExportSummary {
        filename,
        total_films: films.len(),
        path,
    })
}

fn create_unique(dir: &Path, stem: &str, extension: &str) -> OutputResult<(PathBuf, File)> {
    for attempt in 0u32..100 {
        let name = if attempt == 0 {
            format!("{}.{}", stem, extension)
        } else {
            format!("{}_{}.{}", stem, attempt, extension)
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(OutputError::Write(format!(
        "no free export file name for {} in {}",
        stem,
        dir.display()
    )))
}

fn write_tsv<W: Write>(writer: &mut W, films: &[FilmRecord]) -> OutputResult<()> {
    writeln!(writer, "{}", TSV_COLUMNS.join("\t"))?;

    for film in films {
        let row = [
            film.identity_key.to_string(),
            film.spine_number.map(|n| n.to_string()).unwrap_or_default(),
            film.title.clone(),
            film.director.clone().unwrap_or_default(),
            film.release_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            film.release_status.to_string(),
            film.format.clone().unwrap_or_default(),
            film.price.clone().unwrap_or_default(),
            film.description.clone().unwrap_or_default(),
            film.url.clone().unwrap_or_default(),
            film.cover_art_url.clone().unwrap_or_default(),
            film.special_features.clone().unwrap_or_default(),
            film.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            film.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        ];
        let cells: Vec<String> = row.iter().map(|cell| tsv_cell(cell)).collect();
        writeln!(writer, "{}", cells.join("\t"))?;
    }

    Ok(())
}

/// Tabs and line breaks inside a value become spaces
fn tsv_cell(value: &str) -> String {
    value
        .chars()
        .map(|c| if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::film::{RawFilmRecord, ReleaseStatus};
    use crate::storage::SqliteRepository;

    fn seeded_repository() -> SqliteRepository {
        let repo = SqliteRepository::in_memory().unwrap();
        let mut samurai = RawFilmRecord::new("Seven Samurai", ReleaseStatus::Released);
        samurai.spine_number = Some(2);
        samurai.description = Some("Seven ronin\tdefend\na village".to_string());
        repo.upsert(&samurai).unwrap();

        let mut ugetsu = RawFilmRecord::new("Ugetsu", ReleaseStatus::Upcoming);
        ugetsu.spine_number = Some(3);
        repo.upsert(&ugetsu).unwrap();
        repo
    }

    #[test]
    fn test_json_export_is_array() {
        let dir = tempfile::tempdir().unwrap();
        let repo = seeded_repository();

        let summary = export_films(&repo, dir.path(), ExportFormat::Json).unwrap();

        assert_eq!(summary.total_films, 2);
        assert!(summary.filename.starts_with("films_"));
        assert!(summary.filename.ends_with(".json"));

        let content = fs::read_to_string(&summary.path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        let films = value.as_array().unwrap();
        assert_eq!(films.len(), 2);
        assert_eq!(films[0]["identity_key"], "spine:2");
        assert_eq!(films[0]["release_status"], "released");
    }

    #[test]
    fn test_tsv_export_sanitizes_cells() {
        let dir = tempfile::tempdir().unwrap();
        let repo = seeded_repository();

        let summary = export_films(&repo, dir.path(), ExportFormat::Tsv).unwrap();
        let content = fs::read_to_string(&summary.path).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("identity_key\tspine_number\ttitle"));
        for line in &lines {
            assert_eq!(line.split('\t').count(), TSV_COLUMNS.len());
        }
        assert!(lines[1].contains("Seven ronin defend a village"));
    }

    #[test]
    fn test_exports_never_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let repo = seeded_repository();

        let first = export_films(&repo, dir.path(), ExportFormat::Json).unwrap();
        let second = export_films(&repo, dir.path(), ExportFormat::Json).unwrap();

        assert_ne!(first.filename, second.filename);
    }

    #[test]
    fn test_empty_export() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SqliteRepository::in_memory().unwrap();

        let summary = export_films(&repo, &dir.path().join("out"), ExportFormat::Json).unwrap();

        assert_eq!(summary.total_films, 0);
        let content = fs::read_to_string(&summary.path).unwrap();
        assert_eq!(content.trim(), "[]");
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!("tsv".parse::<ExportFormat>().unwrap(), ExportFormat::Tsv);
        assert!(matches!(
            "csv".parse::<ExportFormat>(),
            Err(OutputError::UnknownFormat(_))
        ));
    }
}
