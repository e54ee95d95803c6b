use crate::vault::clock::{Clock, SystemClock, local_now, local_today};
use crate::vault::index::{ArchiveIndex, IndexError, LoadError, MemberAppend, merge};
use crate::vault::layout::{ArchiveKey, category_prefix, parse_index_key, validate_member_name};
use crate::vault::part_writer::{self, PartWriter};
use crate::vault::retry::Fault;
use crate::vault::scraper::KnownMembers;
use crate::vault::store::{ObjectStore, StoreError};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate};
use chrono_tz::Tz;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

pub const DEFAULT_TIME_ZONE: Tz = chrono_tz::Asia::Kolkata;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Backend(#[from] StoreError),
    #[error("archive {archive} has a corrupt index: {reason}")]
    CorruptIndex { archive: String, reason: String },
    #[error("staging failure at {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid member name `{0}`")]
    InvalidMember(String),
}

impl ArchiveError {
    fn corrupt(key: &ArchiveKey, reason: impl Into<String>) -> Self {
        Self::CorruptIndex {
            archive: key.to_string(),
            reason: reason.into(),
        }
    }

    fn staging(path: &Path, source: io::Error) -> Self {
        Self::Staging {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Only object-store faults are worth another attempt; everything else
    /// would fail the same way again.
    pub fn into_fault(self) -> Fault<Self> {
        match self {
            Self::Backend(_) => Fault::Retryable(self),
            _ => Fault::Fatal(self),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended { part: String, rolled_over: bool },
    AlreadyExists,
}

#[derive(Debug)]
struct ArchiveState {
    index: ArchiveIndex,
    members: HashSet<String>,
    /// Part whose local staging copy is byte-identical to the stored object.
    staged_part: Option<String>,
}

impl ArchiveState {
    fn new(index: ArchiveIndex) -> Self {
        let members = index.member_names();
        Self {
            index,
            members,
            staged_part: None,
        }
    }
}

#[derive(Debug, Default)]
enum Slot {
    #[default]
    Unloaded,
    Ready(ArchiveState),
    Corrupt(String),
}

/// Serializes appends per archive against the object store. Each archive's
/// index is loaded once per run and then kept in memory, so membership
/// checks never go back to the store.
pub struct ArchiveManager {
    store: Arc<dyn ObjectStore>,
    writer: PartWriter,
    clock: Arc<dyn Clock>,
    tz: Tz,
    staging_dir: PathBuf,
    archives: Mutex<HashMap<ArchiveKey, Arc<Mutex<Slot>>>>,
}

impl ArchiveManager {
    pub fn new(store: Arc<dyn ObjectStore>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            writer: PartWriter::default(),
            clock: Arc::new(SystemClock),
            tz: DEFAULT_TIME_ZONE,
            staging_dir: staging_dir.into(),
            archives: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_writer(mut self, writer: PartWriter) -> Self {
        self.writer = writer;
        self
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_time_zone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub fn today(&self) -> NaiveDate {
        local_today(self.clock.as_ref(), self.tz)
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        local_now(self.clock.as_ref(), self.tz)
    }

    fn slot(&self, key: &ArchiveKey) -> Arc<Mutex<Slot>> {
        let mut archives = self.archives.lock().unwrap_or_else(PoisonError::into_inner);
        archives.entry(key.clone()).or_default().clone()
    }

    fn archive_staging_dir(&self, key: &ArchiveKey) -> PathBuf {
        self.staging_dir
            .join(format!("{:04}", key.year))
            .join(&key.category)
    }

    fn ready<'a>(
        &self,
        key: &ArchiveKey,
        slot: &'a mut Slot,
    ) -> Result<&'a mut ArchiveState, ArchiveError> {
        if matches!(slot, Slot::Unloaded) {
            *slot = match ArchiveIndex::load(self.store.as_ref(), key) {
                Ok(Some(index)) => Slot::Ready(ArchiveState::new(index)),
                Ok(None) => Slot::Ready(ArchiveState::new(ArchiveIndex::empty(key, self.now()))),
                Err(LoadError::Corrupt(err)) => {
                    log::error!("archive {key}: index rejected: {err}");
                    Slot::Corrupt(err.to_string())
                }
                Err(LoadError::Store(err)) => return Err(err.into()),
            };
        }
        match slot {
            Slot::Ready(state) => Ok(state),
            Slot::Corrupt(reason) => Err(ArchiveError::corrupt(key, reason.clone())),
            Slot::Unloaded => Err(ArchiveError::corrupt(key, "index was not loaded")),
        }
    }

    pub fn exists(&self, key: &ArchiveKey, member: &str) -> Result<bool, ArchiveError> {
        let slot = self.slot(key);
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let state = self.ready(key, &mut guard)?;
        Ok(state.members.contains(member))
    }

    /// Appends `member` to the archive. The part object is uploaded before
    /// the index that references it, and in-memory state only changes once
    /// both writes succeeded.
    pub fn append_file(
        &self,
        key: &ArchiveKey,
        member: &str,
        bytes: &[u8],
        decision_date: Option<NaiveDate>,
    ) -> Result<AppendOutcome, ArchiveError> {
        if !validate_member_name(member) {
            return Err(ArchiveError::InvalidMember(member.to_string()));
        }

        let slot = self.slot(key);
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let state = self.ready(key, &mut guard)?;
        let result = self.append_locked(key, state, member, bytes, decision_date);
        if let Err(ArchiveError::CorruptIndex { reason, .. }) = &result {
            *guard = Slot::Corrupt(reason.clone());
        }
        result
    }

    fn append_locked(
        &self,
        key: &ArchiveKey,
        state: &mut ArchiveState,
        member: &str,
        bytes: &[u8],
        decision_date: Option<NaiveDate>,
    ) -> Result<AppendOutcome, ArchiveError> {
        if state.members.contains(member) {
            return Ok(AppendOutcome::AlreadyExists);
        }

        let now = self.now();
        let size = bytes.len() as u64;
        let target = self.writer.target(&state.index, size, now);
        let rolled_over = target.is_new && !state.index.parts.is_empty();
        let part_key = key.part_key(&target.name);
        let staged = self.archive_staging_dir(key).join(&target.name);

        let adopt = match self.stage_part(key, state, &target.name, target.is_new, &staged) {
            Ok(adopt) => adopt,
            Err(err) => {
                state.staged_part = None;
                return Err(err);
            }
        };
        // From here the staging copy may hold content the store does not.
        state.staged_part = None;

        if adopt.contains(member) {
            log::info!("archive {key}: adopting {member} already present in {}", target.name);
        } else {
            let mtime = u64::try_from(now.timestamp()).unwrap_or_default();
            part_writer::append_member(&staged, member, bytes, mtime)
                .map_err(|err| ArchiveError::staging(&staged, err))?;
        }
        self.store.put_file(&part_key, &staged)?;

        let merged = merge(
            &state.index,
            &[MemberAppend {
                part: target.name.clone(),
                member: member.to_string(),
                size,
                decision_date,
            }],
            now,
        )
        .map_err(|err| ArchiveError::corrupt(key, err.to_string()))?;
        let body = merged
            .to_json()
            .map_err(|err| ArchiveError::corrupt(key, err.to_string()))?;
        self.store.put(&key.index_key(), &body)?;

        state.index = merged;
        state.members.insert(member.to_string());
        state.staged_part = Some(target.name.clone());
        if rolled_over {
            log::info!("archive {key}: rolled over to {}", target.name);
        }
        Ok(AppendOutcome::Appended {
            part: target.name,
            rolled_over,
        })
    }

    /// Brings the staging copy of `part` in line with the store. Returns the
    /// members the downloaded container already holds that the index does
    /// not list, left behind by an append whose index write never landed.
    fn stage_part(
        &self,
        key: &ArchiveKey,
        state: &ArchiveState,
        part: &str,
        is_new: bool,
        staged: &Path,
    ) -> Result<HashSet<String>, ArchiveError> {
        let dir = self.archive_staging_dir(key);
        if let Some(previous) = state.staged_part.as_deref().filter(|p| *p != part) {
            remove_if_present(&dir.join(previous))?;
        }

        if is_new {
            remove_if_present(staged)?;
            return Ok(HashSet::new());
        }
        if state.staged_part.as_deref() == Some(part) && staged.is_file() {
            return Ok(HashSet::new());
        }

        remove_if_present(staged)?;
        if !self.store.get_to_file(&key.part_key(part), staged)? {
            return Err(ArchiveError::corrupt(
                key,
                format!("open part `{part}` is listed in the index but missing from the store"),
            ));
        }
        let listed: HashSet<&str> = state
            .index
            .parts
            .iter()
            .find(|p| p.name == part)
            .map(|p| p.files.iter().map(String::as_str).collect())
            .unwrap_or_default();
        let held = part_writer::member_names(staged).map_err(|err| ArchiveError::staging(staged, err))?;
        Ok(held
            .into_iter()
            .filter(|name| !listed.contains(name.as_str()))
            .collect())
    }

    /// Validates and releases the archive's run state, dropping its staging
    /// copies. Returns `None` for archives this run never touched.
    pub fn finalize(&self, key: &ArchiveKey) -> Result<Option<ArchiveIndex>, ArchiveError> {
        let slot = {
            let mut archives = self.archives.lock().unwrap_or_else(PoisonError::into_inner);
            archives.remove(key)
        };
        let Some(slot) = slot else {
            return Ok(None);
        };
        let taken = std::mem::take(&mut *slot.lock().unwrap_or_else(PoisonError::into_inner));
        let dir = self.archive_staging_dir(key);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|err| ArchiveError::staging(&dir, err))?;
        }
        match taken {
            Slot::Unloaded => Ok(None),
            Slot::Corrupt(reason) => Err(ArchiveError::corrupt(key, reason)),
            Slot::Ready(state) => {
                state
                    .index
                    .validate()
                    .map_err(|err: IndexError| ArchiveError::corrupt(key, err.to_string()))?;
                Ok(Some(state.index))
            }
        }
    }

    pub fn finalize_all(&self) -> Vec<(ArchiveKey, Result<ArchiveIndex, ArchiveError>)> {
        let mut keys: Vec<ArchiveKey> = {
            let archives = self.archives.lock().unwrap_or_else(PoisonError::into_inner);
            archives.keys().cloned().collect()
        };
        keys.sort();
        keys.into_iter()
            .filter_map(|key| match self.finalize(&key) {
                Ok(Some(index)) => Some((key, Ok(index))),
                Ok(None) => None,
                Err(err) => Some((key, Err(err))),
            })
            .collect()
    }

    /// High-water mark: the latest decision date recorded by the most recent
    /// archive of each category. Archive years past the current year are
    /// ignored so a single misfiled document cannot stall forward sync.
    pub fn latest_known_date(&self, categories: &[String]) -> Result<Option<NaiveDate>, ArchiveError> {
        let current_year = self.today().year();
        let mut latest: Option<NaiveDate> = None;

        for category in categories {
            let keys = self.store.list(&category_prefix(category))?;
            let mut years: Vec<i32> = keys
                .iter()
                .filter_map(|k| parse_index_key(k))
                .filter(|k| k.category == *category)
                .map(|k| k.year)
                .collect();
            years.sort_unstable();
            for future in years.iter().filter(|y| **y > current_year) {
                log::warn!("ignoring {category} archive for future year {future} in high-water mark");
            }
            let Some(year) = years.into_iter().rev().find(|y| *y <= current_year) else {
                continue;
            };

            let key = ArchiveKey::new(year, category.clone());
            let index = match ArchiveIndex::load(self.store.as_ref(), &key) {
                Ok(Some(index)) => index,
                Ok(None) => continue,
                Err(LoadError::Store(err)) => return Err(err.into()),
                Err(LoadError::Corrupt(err)) => return Err(ArchiveError::corrupt(&key, err.to_string())),
            };
            let date = index.latest_known_date();
            latest = Some(latest.map_or(date, |current| current.max(date)));
        }
        Ok(latest)
    }
}

impl KnownMembers for ArchiveManager {
    fn contains(&self, key: &ArchiveKey, member: &str) -> bool {
        match self.exists(key, member) {
            Ok(found) => found,
            Err(err) => {
                log::debug!("treating {member} in {key} as not archived: {err}");
                false
            }
        }
    }
}

fn remove_if_present(path: &Path) -> Result<(), ArchiveError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(ArchiveError::staging(path, err)),
    }
}
