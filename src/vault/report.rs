use crate::vault::index::ArchiveIndex;
use crate::vault::layout::ArchiveKey;
use crate::vault::store::write_atomically;
use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveTally {
    pub appended: u64,
    pub appended_bytes: u64,
    /// Members found upstream that the archive already held.
    pub skipped: u64,
    pub failed: u64,
    pub appended_files: Vec<String>,
    pub failed_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedDay {
    pub day: NaiveDate,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuspectRecord {
    pub archive: String,
    pub member: String,
    pub scraped_day: NaiveDate,
}

/// Per-run accounting shared by both schedulers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub archives: BTreeMap<String, ArchiveTally>,
    pub skipped_days: Vec<SkippedDay>,
    pub suspect_records: Vec<SuspectRecord>,
    pub corrupt_archives: BTreeMap<String, String>,
    pub days_completed: u64,
    pub interrupted_days: u64,
}

impl RunReport {
    fn tally(&mut self, key: &ArchiveKey) -> &mut ArchiveTally {
        self.archives.entry(key.to_string()).or_default()
    }

    pub fn appended(&mut self, key: &ArchiveKey, member: &str, bytes: u64) {
        let tally = self.tally(key);
        tally.appended += 1;
        tally.appended_bytes += bytes;
        tally.appended_files.push(member.to_string());
    }

    pub fn already_archived(&mut self, key: &ArchiveKey) {
        self.tally(key).skipped += 1;
    }

    pub fn failed(&mut self, key: &ArchiveKey, member: &str) {
        let tally = self.tally(key);
        tally.failed += 1;
        tally.failed_files.push(member.to_string());
    }

    pub fn corrupt(&mut self, key: &ArchiveKey, reason: &str) {
        self.corrupt_archives
            .entry(key.to_string())
            .or_insert_with(|| reason.to_string());
    }

    pub fn skip_day(&mut self, day: NaiveDate, reason: impl Into<String>) {
        self.skipped_days.push(SkippedDay {
            day,
            reason: reason.into(),
        });
    }

    pub fn suspect(&mut self, key: &ArchiveKey, member: &str, scraped_day: NaiveDate) {
        self.suspect_records.push(SuspectRecord {
            archive: key.to_string(),
            member: member.to_string(),
            scraped_day,
        });
    }

    /// Folds a per-day report into the run total.
    pub fn absorb(&mut self, other: RunReport) {
        for (archive, tally) in other.archives {
            let into = self.archives.entry(archive).or_default();
            into.appended += tally.appended;
            into.appended_bytes += tally.appended_bytes;
            into.skipped += tally.skipped;
            into.failed += tally.failed;
            into.appended_files.extend(tally.appended_files);
            into.failed_files.extend(tally.failed_files);
        }
        self.skipped_days.extend(other.skipped_days);
        self.suspect_records.extend(other.suspect_records);
        for (archive, reason) in other.corrupt_archives {
            self.corrupt_archives.entry(archive).or_insert(reason);
        }
        self.days_completed += other.days_completed;
        self.interrupted_days += other.interrupted_days;
    }

    pub fn total_appended(&self) -> u64 {
        self.archives.values().map(|t| t.appended).sum()
    }

    pub fn total_skipped(&self) -> u64 {
        self.archives.values().map(|t| t.skipped).sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.archives.values().map(|t| t.failed).sum()
    }

    /// Human-readable lines for the command report.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "appended={} skipped={} failed={} days_completed={} days_skipped={}",
            self.total_appended(),
            self.total_skipped(),
            self.total_failed(),
            self.days_completed,
            self.skipped_days.len()
        )];
        for (archive, tally) in &self.archives {
            lines.push(format!(
                "archive {archive}: appended={} skipped={} failed={}",
                tally.appended, tally.skipped, tally.failed
            ));
        }
        for day in &self.skipped_days {
            lines.push(format!("skipped day {}: {}", day.day, day.reason));
        }
        for suspect in &self.suspect_records {
            lines.push(format!(
                "suspect year: {} in {} (scraped {})",
                suspect.member, suspect.archive, suspect.scraped_day
            ));
        }
        lines
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSummary {
    pub file_count: u64,
    pub total_size: u64,
    pub total_size_human: String,
    pub parts: usize,
}

impl From<&ArchiveIndex> for ArchiveSummary {
    fn from(index: &ArchiveIndex) -> Self {
        Self {
            file_count: index.file_count,
            total_size: index.total_size,
            total_size_human: index.total_size_human.clone(),
            parts: index.parts.len(),
        }
    }
}

/// One element of the cumulative `all_*_changes.json` logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub run: String,
    pub date_range: DateRange,
    pub generated_at: DateTime<FixedOffset>,
    pub archives: BTreeMap<String, ArchiveSummary>,
    pub files: BTreeMap<String, Vec<String>>,
}

impl ChangeLogEntry {
    /// `None` when the run appended nothing.
    pub fn from_run(
        run: &str,
        date_range: DateRange,
        generated_at: DateTime<FixedOffset>,
        report: &RunReport,
        finalized: &[(ArchiveKey, ArchiveIndex)],
    ) -> Option<Self> {
        let files: BTreeMap<String, Vec<String>> = report
            .archives
            .iter()
            .filter(|(_, tally)| !tally.appended_files.is_empty())
            .map(|(archive, tally)| (archive.clone(), tally.appended_files.clone()))
            .collect();
        if files.is_empty() {
            return None;
        }
        let touched: BTreeSet<&String> = files.keys().collect();
        let archives = finalized
            .iter()
            .filter(|(key, _)| touched.contains(&key.to_string()))
            .map(|(key, index)| (key.to_string(), ArchiveSummary::from(index)))
            .collect();
        Some(Self {
            run: run.to_string(),
            date_range,
            generated_at,
            archives,
            files,
        })
    }
}

/// Appends `entry` to the JSON array at `path`. An unreadable log is kept
/// aside as `<name>.bak` rather than silently dropped.
pub fn append_change_log(path: &Path, entry: &ChangeLogEntry) -> Result<()> {
    let mut entries: Vec<serde_json::Value> = Vec::new();
    if path.exists() {
        let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        match serde_json::from_slice::<Vec<serde_json::Value>>(&raw) {
            Ok(existing) => entries = existing,
            Err(err) => {
                let backup = path.with_extension("json.bak");
                log::warn!(
                    "change log {} is not a JSON array ({err}); moving it to {}",
                    path.display(),
                    backup.display()
                );
                fs::rename(path, &backup)
                    .with_context(|| format!("failed to move {}", path.display()))?;
            }
        }
    }
    entries.push(serde_json::to_value(entry)?);
    let mut body = serde_json::to_vec_pretty(&entries)?;
    body.push(b'\n');
    write_atomically(path, &body).with_context(|| format!("failed to write {}", path.display()))
}
