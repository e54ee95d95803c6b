use crate::vault::layout::{ArchiveKey, validate_category, validate_member_name};
use chrono::{Datelike, NaiveDate};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One document produced by the upstream source for a scraped day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedRecord {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub category: String,
    pub year: i32,
    pub decision_date: NaiveDate,
}

impl ScrapedRecord {
    pub fn archive_key(&self) -> ArchiveKey {
        ArchiveKey::new(self.year, self.category.clone())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("upstream fault for {day}: {reason}")]
pub struct UpstreamFault {
    pub day: NaiveDate,
    pub reason: String,
    pub retryable: bool,
}

impl UpstreamFault {
    pub fn transient(day: NaiveDate, reason: impl Into<String>) -> Self {
        Self {
            day,
            reason: reason.into(),
            retryable: true,
        }
    }

    pub fn permanent(day: NaiveDate, reason: impl Into<String>) -> Self {
        Self {
            day,
            reason: reason.into(),
            retryable: false,
        }
    }
}

/// Membership oracle handed to scrapers so they can skip downloads for
/// documents that are already archived.
pub trait KnownMembers {
    fn contains(&self, key: &ArchiveKey, member: &str) -> bool;
}

#[derive(Debug, Default)]
pub struct Harvest {
    pub records: Vec<ScrapedRecord>,
    /// Members the scraper saw upstream but did not fetch.
    pub already_archived: Vec<(ArchiveKey, String)>,
}

pub trait Scraper: Send + Sync {
    fn scrape_day(&self, day: NaiveDate, known: &dyn KnownMembers) -> Result<Harvest, UpstreamFault>;
}

/// Reads documents an external crawler dropped into
/// `<inbox>/<YYYY-MM-DD>/<category>/<file>`. A `year=YYYY/` directory
/// directly under the category overrides the archive year, mirroring
/// crawlers that file a document under its case year.
#[derive(Debug, Clone)]
pub struct InboxScraper {
    root: PathBuf,
}

impl InboxScraper {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn day_dir(&self, day: NaiveDate) -> PathBuf {
        self.root.join(day.format("%Y-%m-%d").to_string())
    }
}

fn sorted_entries(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut out = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    out.sort();
    Ok(out)
}

fn collect_files(root: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for path in sorted_entries(root)? {
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if hidden {
            continue;
        }
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

fn member_name(base: &Path, file: &Path) -> Option<String> {
    let rel = file.strip_prefix(base).ok()?;
    let parts = rel
        .components()
        .map(|c| c.as_os_str().to_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

fn year_override(dir: &Path) -> Option<i32> {
    let name = dir.file_name()?.to_str()?;
    let year = name.strip_prefix("year=")?;
    if year.len() != 4 {
        return None;
    }
    year.parse().ok()
}

impl Scraper for InboxScraper {
    fn scrape_day(&self, day: NaiveDate, known: &dyn KnownMembers) -> Result<Harvest, UpstreamFault> {
        let day_dir = self.day_dir(day);
        let categories = match sorted_entries(&day_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Harvest::default()),
            Err(err) => {
                return Err(UpstreamFault::transient(
                    day,
                    format!("failed to read {}: {err}", day_dir.display()),
                ));
            }
        };

        let mut harvest = Harvest::default();
        for category_dir in categories.into_iter().filter(|p| p.is_dir()) {
            let Some(category) = category_dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !validate_category(category) {
                log::warn!("skipping inbox directory with invalid category: {}", category_dir.display());
                continue;
            }

            let mut files = Vec::new();
            collect_files(&category_dir, &mut files).map_err(|err| {
                UpstreamFault::transient(day, format!("failed to list {}: {err}", category_dir.display()))
            })?;

            for file in files {
                let (base, year) = match file.parent() {
                    Some(parent) if parent != category_dir => match year_override(parent) {
                        Some(year) if parent.parent() == Some(category_dir.as_path()) => {
                            (parent.to_path_buf(), year)
                        }
                        _ => (category_dir.clone(), day.year()),
                    },
                    _ => (category_dir.clone(), day.year()),
                };
                let Some(name) = member_name(&base, &file).filter(|n| validate_member_name(n)) else {
                    log::warn!("skipping inbox file with unusable name: {}", file.display());
                    continue;
                };

                let key = ArchiveKey::new(year, category);
                if known.contains(&key, &name) {
                    harvest.already_archived.push((key, name));
                    continue;
                }
                let bytes = fs::read(&file).map_err(|err| {
                    let reason = format!("failed to read {}: {err}", file.display());
                    if err.kind() == ErrorKind::PermissionDenied {
                        UpstreamFault::permanent(day, reason)
                    } else {
                        UpstreamFault::transient(day, reason)
                    }
                })?;
                harvest.records.push(ScrapedRecord {
                    file_name: name,
                    bytes,
                    category: category.to_string(),
                    year,
                    decision_date: day,
                });
            }
        }
        Ok(harvest)
    }
}
