use anyhow::{Context, Result};

use crate::commands::{CommandReport, load_vault_config, open_manager, storage_label};
use crate::vault::checkpoint;
use crate::vault::index::{ArchiveIndex, LoadError};
use crate::vault::layout::parse_index_key;
use crate::vault::paths::resolve_paths;

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_vault_config()?;
    let manager = open_manager(&paths, &cfg)?;
    let store = manager.store();

    let mut report = CommandReport::new("status");
    report.detail(format!("vault_home={}", paths.vault_home.display()));
    report.detail(storage_label(&paths, &cfg));
    report.detail(format!("inbox_dir={}", paths.inbox_dir.display()));
    report.detail(format!("state_dir={}", paths.state_dir.display()));

    let mut archives: Vec<_> = store
        .list("")
        .context("failed to list bucket")?
        .iter()
        .filter_map(|key| parse_index_key(key))
        .collect();
    archives.sort();
    report.detail(format!("archives={}", archives.len()));
    for archive in &archives {
        match ArchiveIndex::load(store, archive) {
            Ok(Some(index)) => report.detail(format!(
                "{archive}: files={} size={} parts={} latest={} updated_at={}",
                index.file_count,
                index.total_size_human,
                index.parts.len(),
                index
                    .latest_decision_date
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                index.updated_at.to_rfc3339()
            )),
            Ok(None) => {}
            Err(LoadError::Corrupt(err)) => report.issue(format!("{archive}: corrupt index: {err}")),
            Err(LoadError::Store(err)) => return Err(err.into()),
        }
    }

    match manager.latest_known_date(&cfg.archive.categories) {
        Ok(Some(hwm)) => report.detail(format!("high_water_mark={hwm}")),
        Ok(None) => report.detail("high_water_mark=none (run gap-fill first)"),
        Err(err) => report.issue(format!("high water mark unavailable: {err}")),
    }

    match checkpoint::load(&paths.checkpoint_file()) {
        Ok(Some(cp)) => {
            report.detail(format!(
                "gap_fill_checkpoint={} updated_at={}",
                cp.last_completed_end_date,
                cp.updated_at.to_rfc3339()
            ));
            if !cp.skipped_dates.is_empty() {
                report.detail(format!("gap_fill_skipped_days={}", cp.skipped_dates.len()));
            }
        }
        Ok(None) => report.detail(format!(
            "gap_fill_checkpoint=none (starts at {})",
            cfg.backfill.start_date
        )),
        Err(err) => report.issue(err.to_string()),
    }

    Ok(report)
}
