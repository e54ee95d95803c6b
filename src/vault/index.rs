use crate::vault::layout::ArchiveKey;
use crate::vault::part_writer::PartWriter;
use crate::vault::store::{ObjectStore, StoreError};
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartEntry {
    pub name: String,
    pub files: Vec<String>,
    pub file_count: u64,
    pub size: u64,
    pub size_human: String,
    pub created_at: DateTime<FixedOffset>,
}

impl PartEntry {
    pub fn new(name: impl Into<String>, created_at: DateTime<FixedOffset>) -> Self {
        Self {
            name: name.into(),
            files: Vec::new(),
            file_count: 0,
            size: 0,
            size_human: format_size(0),
            created_at,
        }
    }
}

/// Persisted `<category>.index.json` document. The rollup fields are
/// denormalized from `parts` and must always agree with them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveIndex {
    pub year: i32,
    pub archive_type: String,
    pub file_count: u64,
    pub total_size: u64,
    pub total_size_human: String,
    pub created_at: DateTime<FixedOffset>,
    pub updated_at: DateTime<FixedOffset>,
    pub parts: Vec<PartEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_decision_date: Option<NaiveDate>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("index is not valid JSON: {0}")]
    Parse(String),
    #[error("index describes {found}, expected {expected}")]
    IdentityMismatch { expected: String, found: String },
    #[error("part `{part}` records file_count {recorded} but lists {listed} files")]
    PartFileCount {
        part: String,
        recorded: u64,
        listed: u64,
    },
    #[error("rollup file_count {recorded} disagrees with parts ({derived})")]
    FileCount { recorded: u64, derived: u64 },
    #[error("rollup total_size {recorded} disagrees with parts ({derived})")]
    TotalSize { recorded: u64, derived: u64 },
    #[error("part name `{0}` appears more than once")]
    DuplicatePart(String),
    #[error("member `{0}` appears more than once")]
    DuplicateMember(String),
    #[error("cannot append to closed part `{0}`")]
    ClosedPart(String),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Corrupt(#[from] IndexError),
}

/// One member recorded by an append, as handed to [`merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberAppend {
    pub part: String,
    pub member: String,
    pub size: u64,
    pub decision_date: Option<NaiveDate>,
}

impl ArchiveIndex {
    pub fn empty(key: &ArchiveKey, now: DateTime<FixedOffset>) -> Self {
        Self {
            year: key.year,
            archive_type: key.category.clone(),
            file_count: 0,
            total_size: 0,
            total_size_human: format_size(0),
            created_at: now,
            updated_at: now,
            parts: Vec::new(),
            latest_decision_date: None,
        }
    }

    pub fn key(&self) -> ArchiveKey {
        ArchiveKey::new(self.year, self.archive_type.clone())
    }

    pub fn from_json(raw: &[u8]) -> Result<Self, IndexError> {
        serde_json::from_slice(raw).map_err(|err| IndexError::Parse(err.to_string()))
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        let mut out = serde_json::to_vec_pretty(self)?;
        out.push(b'\n');
        Ok(out)
    }

    /// Fetches and validates the index for `key`; `Ok(None)` means the
    /// archive has never been written.
    pub fn load(store: &dyn ObjectStore, key: &ArchiveKey) -> Result<Option<Self>, LoadError> {
        let Some(raw) = store.get(&key.index_key())? else {
            return Ok(None);
        };
        let index = Self::from_json(&raw)?;
        if index.key() != *key {
            return Err(IndexError::IdentityMismatch {
                expected: key.to_string(),
                found: index.key().to_string(),
            }
            .into());
        }
        index.validate()?;
        Ok(Some(index))
    }

    pub fn validate(&self) -> Result<(), IndexError> {
        let mut part_names = HashSet::with_capacity(self.parts.len());
        let mut members = HashSet::with_capacity(self.file_count as usize);
        let mut derived_count = 0u64;
        let mut derived_size = 0u64;

        for part in &self.parts {
            if !part_names.insert(part.name.as_str()) {
                return Err(IndexError::DuplicatePart(part.name.clone()));
            }
            let listed = part.files.len() as u64;
            if part.file_count != listed {
                return Err(IndexError::PartFileCount {
                    part: part.name.clone(),
                    recorded: part.file_count,
                    listed,
                });
            }
            for member in &part.files {
                if !members.insert(member.as_str()) {
                    return Err(IndexError::DuplicateMember(member.clone()));
                }
            }
            derived_count += part.file_count;
            derived_size += part.size;
        }

        if self.file_count != derived_count {
            return Err(IndexError::FileCount {
                recorded: self.file_count,
                derived: derived_count,
            });
        }
        if self.total_size != derived_size {
            return Err(IndexError::TotalSize {
                recorded: self.total_size,
                derived: derived_size,
            });
        }
        Ok(())
    }

    pub fn member_names(&self) -> HashSet<String> {
        self.parts
            .iter()
            .flat_map(|p| p.files.iter().cloned())
            .collect()
    }

    /// The only part still accepting members.
    pub fn open_part(&self) -> Option<&PartEntry> {
        self.parts.last()
    }

    /// Latest decision date this archive is known to cover. Indexes written
    /// before decision dates were tracked fall back to their last update.
    pub fn latest_known_date(&self) -> NaiveDate {
        self.latest_decision_date
            .unwrap_or_else(|| self.updated_at.date_naive())
    }

    fn recompute_rollup(&mut self) {
        self.file_count = self.parts.iter().map(|p| p.file_count).sum();
        self.total_size = self.parts.iter().map(|p| p.size).sum();
        self.total_size_human = format_size(self.total_size);
    }
}

/// Applies `delta` on top of `remote`. The remote bookkeeping is re-derived
/// from its parts first, so an index torn by an earlier crash is rejected
/// instead of being extended.
pub fn merge(
    remote: &ArchiveIndex,
    delta: &[MemberAppend],
    now: DateTime<FixedOffset>,
) -> Result<ArchiveIndex, IndexError> {
    remote.validate()?;

    let mut out = remote.clone();
    let mut members = remote.member_names();
    let mut changed = false;

    for append in delta {
        if members.contains(&append.member) {
            continue;
        }

        let open_name = out.parts.last().map(|p| p.name.clone());
        if open_name.as_deref() != Some(append.part.as_str()) {
            if out.parts.iter().any(|p| p.name == append.part) {
                return Err(IndexError::ClosedPart(append.part.clone()));
            }
            out.parts.push(PartEntry::new(append.part.clone(), now));
        }

        let Some(part) = out.parts.last_mut() else {
            continue;
        };
        *part = PartWriter::append(part, &append.member, append.size);
        members.insert(append.member.clone());

        if let Some(date) = append.decision_date {
            out.latest_decision_date = Some(match out.latest_decision_date {
                Some(current) => current.max(date),
                None => date,
            });
        }
        changed = true;
    }

    if changed {
        out.recompute_rollup();
        out.updated_at = now;
    }
    out.validate()?;
    Ok(out)
}

/// Human-readable byte count in binary units, e.g. `1.50 GB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut size = bytes as f64;
    let mut unit = 0usize;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{size:.2} {}", UNITS[unit])
    }
}
