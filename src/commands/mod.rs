pub mod config;
pub mod gap_fill;
pub mod status;
pub mod sync;
pub mod verify;

use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::error::VaultError;
use crate::vault::config::{VaultConfig, load_config};
use crate::vault::index::ArchiveIndex;
use crate::vault::layout::ArchiveKey;
use crate::vault::manager::ArchiveManager;
use crate::vault::part_writer::PartWriter;
use crate::vault::paths::VaultPaths;
use crate::vault::report::{ChangeLogEntry, DateRange, RunReport, append_change_log};
use crate::vault::s3::S3ObjectStore;
use crate::vault::store::{FsObjectStore, ObjectStore};

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }
}

pub fn load_vault_config() -> Result<VaultConfig> {
    load_config().map_err(|err| VaultError::InvalidConfig(format!("{err:#}")).into())
}

/// Names the archive backend for command output.
pub fn storage_label(paths: &VaultPaths, cfg: &VaultConfig) -> String {
    match &cfg.storage.bucket {
        Some(url) => format!("bucket={url}"),
        None => format!("bucket_dir={}", paths.bucket_dir.display()),
    }
}

/// Opens S3 when `storage.bucket` is set, otherwise the directory mirror at
/// `bucket_dir`.
pub fn open_store(paths: &VaultPaths, cfg: &VaultConfig) -> Result<Arc<dyn ObjectStore>> {
    if cfg.storage.bucket.is_some() {
        return Ok(Arc::new(S3ObjectStore::connect(&cfg.storage)?));
    }
    Ok(Arc::new(FsObjectStore::new(&paths.bucket_dir)))
}

pub fn open_manager(paths: &VaultPaths, cfg: &VaultConfig) -> Result<ArchiveManager> {
    let store = open_store(paths, cfg)?;
    Ok(ArchiveManager::new(store, &paths.staging_dir)
        .with_writer(PartWriter::new(cfg.archive.part_threshold_bytes))
        .with_time_zone(cfg.time_zone()?))
}

/// Adds the run tallies to `report` and appends the run to the cumulative
/// change log when anything was archived.
pub fn record_run(
    report: &mut CommandReport,
    run: &str,
    manager: &ArchiveManager,
    window: Option<(chrono::NaiveDate, chrono::NaiveDate)>,
    outcome: &RunReport,
    finalized: &[(ArchiveKey, ArchiveIndex)],
    change_log: &Path,
) -> Result<()> {
    for line in outcome.summary_lines() {
        report.detail(line);
    }
    for (archive, reason) in &outcome.corrupt_archives {
        report.detail(format!("corrupt archive {archive}: {reason}"));
    }

    let Some((from, to)) = window else {
        return Ok(());
    };
    if let Some(entry) =
        ChangeLogEntry::from_run(run, DateRange { from, to }, manager.now(), outcome, finalized)
    {
        append_change_log(change_log, &entry)?;
        report.detail(format!("change_log={}", change_log.display()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn paths(root: &Path) -> VaultPaths {
        VaultPaths {
            vault_home: root.to_path_buf(),
            bucket_dir: root.join("bucket"),
            inbox_dir: root.join("inbox"),
            state_dir: root.join("state"),
            staging_dir: root.join("staging"),
        }
    }

    #[test]
    fn directory_mirror_is_used_without_a_bucket() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = paths(tmp.path());
        let cfg = VaultConfig::default();
        let store = open_store(&paths, &cfg).expect("open");
        store.put("metadata/year=2024/metadata.index.json", b"{}").expect("put");
        assert!(paths.bucket_dir.join("metadata/year=2024/metadata.index.json").is_file());
        assert_eq!(
            storage_label(&paths, &cfg),
            format!("bucket_dir={}", paths.bucket_dir.display())
        );
    }

    #[test]
    fn configured_bucket_selects_s3() {
        let paths = paths(&PathBuf::from("/srv/jvault"));
        let mut cfg = VaultConfig::default();
        cfg.storage.bucket = Some("s3://judgments/vault".to_string());
        cfg.storage.region = Some("ap-south-1".to_string());
        cfg.storage.endpoint_url = Some("http://127.0.0.1:9".to_string());
        assert_eq!(storage_label(&paths, &cfg), "bucket=s3://judgments/vault");
        assert!(open_store(&paths, &cfg).is_ok());
        assert!(!paths.bucket_dir.exists());
    }
}
