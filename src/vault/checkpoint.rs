use crate::error::VaultError;
use crate::vault::store::write_atomically;
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const CHECKPOINT_FILE: &str = "gap_fill_checkpoint.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapFillCheckpoint {
    pub last_completed_end_date: NaiveDate,
    pub updated_at: DateTime<FixedOffset>,
    /// Days given up on after retries; re-running gap-fill from an earlier
    /// start date revisits them.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub skipped_dates: BTreeSet<NaiveDate>,
}

pub fn checkpoint_path(state_dir: &Path) -> PathBuf {
    state_dir.join(CHECKPOINT_FILE)
}

pub fn load(path: &Path) -> Result<Option<GapFillCheckpoint>, VaultError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(VaultError::CheckpointCorrupt {
                path: path.display().to_string(),
                reason: err.to_string(),
            });
        }
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|err| VaultError::CheckpointCorrupt {
            path: path.display().to_string(),
            reason: err.to_string(),
        })
}

pub fn save(path: &Path, checkpoint: &GapFillCheckpoint) -> Result<(), VaultError> {
    let write_err = |reason: String| VaultError::CheckpointWrite {
        path: path.display().to_string(),
        reason,
    };
    let mut data = serde_json::to_vec_pretty(checkpoint).map_err(|err| write_err(err.to_string()))?;
    data.push(b'\n');
    write_atomically(path, &data).map_err(|err| write_err(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn sample() -> GapFillCheckpoint {
        GapFillCheckpoint {
            last_completed_end_date: NaiveDate::from_ymd_opt(1954, 12, 31).unwrap(),
            updated_at: FixedOffset::east_opt(19_800)
                .unwrap()
                .with_ymd_and_hms(2025, 6, 30, 11, 30, 0)
                .unwrap(),
            skipped_dates: BTreeSet::new(),
        }
    }

    #[test]
    fn missing_checkpoint_loads_as_none() {
        let tmp = tempdir().expect("tempdir");
        assert_eq!(load(&checkpoint_path(tmp.path())).expect("load"), None);
    }

    #[test]
    fn saved_checkpoint_uses_documented_fields() {
        let tmp = tempdir().expect("tempdir");
        let path = checkpoint_path(&tmp.path().join("state"));
        save(&path, &sample()).expect("save");

        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).expect("read")).expect("json");
        assert_eq!(raw["last_completed_end_date"], "1954-12-31");
        assert!(raw.get("updated_at").is_some());
        assert!(raw.get("skipped_dates").is_none());
        assert_eq!(load(&path).expect("load"), Some(sample()));
    }

    #[test]
    fn garbage_checkpoint_is_a_scheduler_fault() {
        let tmp = tempdir().expect("tempdir");
        let path = checkpoint_path(tmp.path());
        fs::write(&path, "{\"last_completed_end_date\": 12}").expect("write");
        assert!(matches!(load(&path), Err(VaultError::CheckpointCorrupt { .. })));
    }

    #[test]
    fn legacy_checkpoint_without_skipped_dates_loads() {
        let tmp = tempdir().expect("tempdir");
        let path = checkpoint_path(tmp.path());
        fs::write(
            &path,
            r#"{"last_completed_end_date": "1999-12-31", "updated_at": "2025-01-01T00:00:00+05:30"}"#,
        )
        .expect("write");
        let loaded = load(&path).expect("load").expect("checkpoint");
        assert!(loaded.skipped_dates.is_empty());
    }
}
