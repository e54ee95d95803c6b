use crate::vault::checkpoint::checkpoint_path;
use crate::vault::lock::LOCK_FILE;
use anyhow::Result;
use std::env;
use std::path::PathBuf;

pub const SYNC_CHANGES_FILE: &str = "all_sync_changes.json";
pub const FILL_CHANGES_FILE: &str = "all_fill_changes.json";

#[derive(Debug, Clone)]
pub struct VaultPaths {
    pub vault_home: PathBuf,
    /// Directory mirroring the object-storage bucket.
    pub bucket_dir: PathBuf,
    pub inbox_dir: PathBuf,
    pub state_dir: PathBuf,
    pub staging_dir: PathBuf,
}

impl VaultPaths {
    pub fn checkpoint_file(&self) -> PathBuf {
        checkpoint_path(&self.state_dir)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.state_dir.join(LOCK_FILE)
    }

    pub fn sync_changes_file(&self) -> PathBuf {
        self.state_dir.join(SYNC_CHANGES_FILE)
    }

    pub fn fill_changes_file(&self) -> PathBuf {
        self.state_dir.join(FILL_CHANGES_FILE)
    }
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<VaultPaths> {
    let vault_home = match env::var("JVAULT_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => required_home_dir()?.join("jvault"),
    };

    let bucket_dir = env_or_default_path("JVAULT_BUCKET_DIR", vault_home.join("bucket"));
    let inbox_dir = env_or_default_path("JVAULT_INBOX_DIR", vault_home.join("inbox"));
    let state_dir = env_or_default_path("JVAULT_STATE_DIR", vault_home.join("state"));
    let staging_dir = env_or_default_path("JVAULT_STAGING_DIR", vault_home.join("staging"));

    Ok(VaultPaths {
        vault_home,
        bucket_dir,
        inbox_dir,
        state_dir,
        staging_dir,
    })
}
