use anyhow::Result;
use chrono::NaiveDate;
use std::time::Duration;

use crate::commands::{
    CommandReport, load_vault_config, open_manager, record_run, storage_label,
};
use crate::vault::gap_fill::{GapFillScheduler, GapFillStatus};
use crate::vault::lock::RunLock;
use crate::vault::paths::resolve_paths;
use crate::vault::scraper::InboxScraper;

#[derive(Debug, Clone, Default)]
pub struct GapFillCommandOptions {
    pub until: Option<NaiveDate>,
    pub max_chunks: Option<u32>,
    /// Overrides the configured budget; 0 disables it.
    pub timeout_secs: Option<u64>,
}

pub fn run(opts: &GapFillCommandOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_vault_config()?;
    let _lock = RunLock::acquire(&paths.lock_file())?;
    let manager = open_manager(&paths, &cfg)?;
    let scraper = InboxScraper::new(&paths.inbox_dir);

    let mut options = cfg.gap_fill_options();
    options.until = opts.until;
    options.max_chunks = opts.max_chunks;
    if let Some(secs) = opts.timeout_secs {
        options.timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }

    let mut report = CommandReport::new("gap-fill");
    report.detail(storage_label(&paths, &cfg));
    report.detail(format!("checkpoint={}", paths.checkpoint_file().display()));

    let outcome =
        GapFillScheduler::new(&manager, &scraper, paths.checkpoint_file(), options).run()?;

    match outcome.status {
        GapFillStatus::Exhausted => report.detail("status=exhausted"),
        GapFillStatus::MoreRemains { resume_from } => {
            report.detail(format!("status=more_remains resume_from={resume_from}"))
        }
    }
    report.detail(format!("state={:?}", outcome.state));
    report.detail(format!("chunks_completed={}", outcome.chunks_completed));
    if let Some(cp) = &outcome.checkpoint {
        report.detail(format!(
            "last_completed_end_date={}",
            cp.last_completed_end_date
        ));
    }
    record_run(
        &mut report,
        "gap-fill",
        &manager,
        outcome.window,
        &outcome.report,
        &outcome.finalized,
        &paths.fill_changes_file(),
    )?;
    Ok(report)
}
