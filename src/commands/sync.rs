use anyhow::Result;
use chrono::NaiveDate;

use crate::commands::{
    CommandReport, load_vault_config, open_manager, record_run, storage_label,
};
use crate::vault::lock::RunLock;
use crate::vault::paths::resolve_paths;
use crate::vault::scraper::InboxScraper;
use crate::vault::sync::{SyncOptions, SyncScheduler, SyncStatus};

#[derive(Debug, Clone, Default)]
pub struct SyncCommandOptions {
    pub until: Option<NaiveDate>,
}

pub fn run(opts: &SyncCommandOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_vault_config()?;
    let _lock = RunLock::acquire(&paths.lock_file())?;
    let manager = open_manager(&paths, &cfg)?;
    let scraper = InboxScraper::new(&paths.inbox_dir);

    let mut report = CommandReport::new("sync");
    report.detail(storage_label(&paths, &cfg));
    report.detail(format!("inbox_dir={}", paths.inbox_dir.display()));

    let outcome = SyncScheduler::new(
        &manager,
        &scraper,
        SyncOptions {
            categories: cfg.archive.categories.clone(),
            until: opts.until,
            pipeline: cfg.pipeline_options(),
        },
    )
    .run()?;

    report.detail(format!("high_water_mark={}", outcome.high_water_mark));
    let window = match outcome.status {
        SyncStatus::UpToDate => {
            report.detail("status=up_to_date");
            None
        }
        SyncStatus::Synced { from, to } => {
            report.detail(format!("status=synced from={from} to={to}"));
            Some((from, to))
        }
    };
    record_run(
        &mut report,
        "sync",
        &manager,
        window,
        &outcome.report,
        &outcome.finalized,
        &paths.sync_changes_file(),
    )?;
    Ok(report)
}
