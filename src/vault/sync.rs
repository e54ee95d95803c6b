use crate::error::VaultError;
use crate::vault::gap_fill::finalize_into;
use crate::vault::index::ArchiveIndex;
use crate::vault::layout::ArchiveKey;
use crate::vault::manager::ArchiveManager;
use crate::vault::pipeline::{Pipeline, PipelineOptions, StopSignal};
use crate::vault::report::RunReport;
use crate::vault::scraper::Scraper;
use anyhow::Result;
use chrono::NaiveDate;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Categories whose newest archive defines the high-water mark.
    pub categories: Vec<String>,
    pub until: Option<NaiveDate>,
    pub pipeline: PipelineOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    UpToDate,
    Synced { from: NaiveDate, to: NaiveDate },
}

#[derive(Debug)]
pub struct SyncOutcome {
    pub status: SyncStatus,
    pub high_water_mark: NaiveDate,
    pub report: RunReport,
    pub finalized: Vec<(ArchiveKey, ArchiveIndex)>,
}

/// Single-shot forward sync: scrapes every day after the high-water mark
/// up to the horizon. Documents published upstream for days at or before the
/// mark are left to gap-fill.
pub struct SyncScheduler<'a> {
    manager: &'a ArchiveManager,
    scraper: &'a dyn Scraper,
    options: SyncOptions,
}

impl<'a> SyncScheduler<'a> {
    pub fn new(manager: &'a ArchiveManager, scraper: &'a dyn Scraper, options: SyncOptions) -> Self {
        Self {
            manager,
            scraper,
            options,
        }
    }

    pub fn run(&self) -> Result<SyncOutcome> {
        let hwm = self
            .manager
            .latest_known_date(&self.options.categories)
            .map_err(|err| VaultError::HighWaterMark(err.to_string()))?;
        let Some(hwm) = hwm else {
            return Err(VaultError::NoHighWaterMark {
                categories: self.options.categories.join(","),
            }
            .into());
        };
        let horizon = self.options.until.unwrap_or_else(|| self.manager.today());
        log::info!("high-water mark {hwm}, horizon {horizon}");

        if hwm >= horizon {
            log::info!("archive is up to date");
            return Ok(SyncOutcome {
                status: SyncStatus::UpToDate,
                high_water_mark: hwm,
                report: RunReport::default(),
                finalized: Vec::new(),
            });
        }

        let Some(from) = hwm.succ_opt() else {
            return Err(VaultError::HighWaterMark(format!("{hwm} has no successor")).into());
        };
        let days: Vec<NaiveDate> = from.iter_days().take_while(|d| *d <= horizon).collect();
        log::info!("syncing {} day(s): {from}..={horizon}", days.len());

        let pipeline = Pipeline::new(self.manager, self.scraper, self.options.pipeline);
        let mut report = pipeline.run(days, &StopSignal::default(), |result| {
            log::debug!("sync day {} -> {:?}", result.day, result.status);
            Ok(())
        })?;
        let finalized = finalize_into(self.manager, &mut report);

        Ok(SyncOutcome {
            status: SyncStatus::Synced { from, to: horizon },
            high_water_mark: hwm,
            report,
            finalized,
        })
    }
}
