use crate::vault::checkpoint::{self, GapFillCheckpoint};
use crate::vault::index::ArchiveIndex;
use crate::vault::layout::ArchiveKey;
use crate::vault::manager::ArchiveManager;
use crate::vault::pipeline::{DayStatus, Pipeline, PipelineOptions, StopSignal};
use crate::vault::report::RunReport;
use crate::vault::scraper::Scraper;
use anyhow::Result;
use chrono::{Months, NaiveDate};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

pub const DEFAULT_CHUNK_YEARS: u32 = 5;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(19_800);

pub fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1950, 1, 1).unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Clone)]
pub struct GapFillOptions {
    pub start_date: NaiveDate,
    pub chunk_years: u32,
    pub timeout: Option<Duration>,
    pub max_chunks: Option<u32>,
    /// Last day to backfill; defaults to today in the archive time zone.
    pub until: Option<NaiveDate>,
    pub pipeline: PipelineOptions,
}

impl Default for GapFillOptions {
    fn default() -> Self {
        Self {
            start_date: default_start_date(),
            chunk_years: DEFAULT_CHUNK_YEARS,
            timeout: Some(DEFAULT_TIMEOUT),
            max_chunks: None,
            until: None,
            pipeline: PipelineOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapFillState {
    Idle,
    ChunkInProgress { start: NaiveDate, end: NaiveDate },
    ChunkComplete { end: NaiveDate },
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapFillStatus {
    MoreRemains { resume_from: NaiveDate },
    Exhausted,
}

#[derive(Debug)]
pub struct GapFillOutcome {
    pub status: GapFillStatus,
    pub state: GapFillState,
    pub chunks_completed: u32,
    pub window: Option<(NaiveDate, NaiveDate)>,
    pub checkpoint: Option<GapFillCheckpoint>,
    pub report: RunReport,
    pub finalized: Vec<(ArchiveKey, ArchiveIndex)>,
}

/// Inclusive last day of the chunk starting at `start`.
pub fn chunk_end(start: NaiveDate, years: u32, horizon: NaiveDate) -> NaiveDate {
    start
        .checked_add_months(Months::new(years.max(1) * 12))
        .and_then(|next| next.pred_opt())
        .map_or(horizon, |end| end.min(horizon))
}

/// Tracks the contiguous prefix of finished days; days complete out of
/// order on the worker pool.
#[derive(Debug)]
struct Frontier {
    next: NaiveDate,
    finished: BTreeSet<NaiveDate>,
}

impl Frontier {
    fn new(start: NaiveDate) -> Self {
        Self {
            next: start,
            finished: BTreeSet::new(),
        }
    }

    /// Marks `day` finished and returns the new last contiguous day when the
    /// prefix grew.
    fn finish(&mut self, day: NaiveDate) -> Option<NaiveDate> {
        self.finished.insert(day);
        let before = self.next;
        while self.finished.remove(&self.next) {
            match self.next.succ_opt() {
                Some(next) => self.next = next,
                None => break,
            }
        }
        if self.next == before {
            None
        } else {
            self.next.pred_opt()
        }
    }
}

pub struct GapFillScheduler<'a> {
    manager: &'a ArchiveManager,
    scraper: &'a dyn Scraper,
    checkpoint_path: PathBuf,
    options: GapFillOptions,
}

impl<'a> GapFillScheduler<'a> {
    pub fn new(
        manager: &'a ArchiveManager,
        scraper: &'a dyn Scraper,
        checkpoint_path: impl Into<PathBuf>,
        options: GapFillOptions,
    ) -> Self {
        Self {
            manager,
            scraper,
            checkpoint_path: checkpoint_path.into(),
            options,
        }
    }

    pub fn run(&self) -> Result<GapFillOutcome> {
        let started = Instant::now();
        let stop = StopSignal::new(self.options.timeout.map(|t| started + t));
        let horizon = self.options.until.unwrap_or_else(|| self.manager.today());
        let mut checkpoint = checkpoint::load(&self.checkpoint_path)?;

        let mut next_start = match &checkpoint {
            Some(cp) => {
                log::info!(
                    "resuming gap-fill after {} (checkpoint {})",
                    cp.last_completed_end_date,
                    self.checkpoint_path.display()
                );
                cp.last_completed_end_date
                    .succ_opt()
                    .unwrap_or(cp.last_completed_end_date)
            }
            None => self.options.start_date,
        };
        let first_start = next_start;
        let mut skipped: BTreeSet<NaiveDate> = checkpoint
            .as_ref()
            .map(|cp| cp.skipped_dates.clone())
            .unwrap_or_default();

        let mut state = GapFillState::Idle;
        let mut chunks_completed = 0u32;
        let mut report = RunReport::default();
        let pipeline = Pipeline::new(self.manager, self.scraper, self.options.pipeline);

        let status = loop {
            if next_start > horizon {
                break GapFillStatus::Exhausted;
            }
            if self.options.max_chunks.is_some_and(|max| chunks_completed >= max) {
                break GapFillStatus::MoreRemains {
                    resume_from: next_start,
                };
            }
            if stop.stopped() {
                log::warn!("gap-fill budget spent before chunk starting {next_start}");
                state = GapFillState::TimedOut;
                break GapFillStatus::MoreRemains {
                    resume_from: next_start,
                };
            }

            let end = chunk_end(next_start, self.options.chunk_years, horizon);
            state = GapFillState::ChunkInProgress {
                start: next_start,
                end,
            };
            log::info!("gap-fill {state:?}");

            let days: Vec<NaiveDate> = next_start.iter_days().take_while(|d| *d <= end).collect();
            let mut frontier = Frontier::new(next_start);
            let chunk_report = pipeline.run(days, &stop, |result| {
                match &result.status {
                    DayStatus::Completed => {}
                    DayStatus::Skipped { .. } => {
                        skipped.insert(result.day);
                    }
                    DayStatus::Interrupted => return Ok(()),
                }
                if let Some(done) = frontier.finish(result.day) {
                    let advanced = GapFillCheckpoint {
                        last_completed_end_date: done,
                        updated_at: self.manager.now(),
                        skipped_dates: skipped.range(..=done).copied().collect(),
                    };
                    checkpoint::save(&self.checkpoint_path, &advanced)?;
                    checkpoint = Some(advanced);
                }
                Ok(())
            });

            let chunk_report = match chunk_report {
                Ok(chunk_report) => chunk_report,
                Err(err) => {
                    log::error!("gap-fill chunk {next_start}..={end} failed: {err:#}");
                    self.finalize(&mut report);
                    return Err(err);
                }
            };
            report.absorb(chunk_report);

            if frontier.next > end {
                state = GapFillState::ChunkComplete { end };
                chunks_completed += 1;
                next_start = frontier.next;
            } else {
                log::warn!(
                    "gap-fill stopped inside chunk {next_start}..={end}; resume from {}",
                    frontier.next
                );
                state = GapFillState::TimedOut;
                break GapFillStatus::MoreRemains {
                    resume_from: frontier.next,
                };
            }
        };

        let finalized = self.finalize(&mut report);
        let last_done = match status {
            GapFillStatus::Exhausted => Some(horizon),
            GapFillStatus::MoreRemains { resume_from } => resume_from.pred_opt(),
        };
        let window = last_done
            .filter(|last| *last >= first_start)
            .map(|last| (first_start, last));
        Ok(GapFillOutcome {
            status,
            state,
            chunks_completed,
            window,
            checkpoint,
            report,
            finalized,
        })
    }

    fn finalize(&self, report: &mut RunReport) -> Vec<(ArchiveKey, ArchiveIndex)> {
        finalize_into(self.manager, report)
    }
}

pub(crate) fn finalize_into(
    manager: &ArchiveManager,
    report: &mut RunReport,
) -> Vec<(ArchiveKey, ArchiveIndex)> {
    let mut out = Vec::new();
    for (key, result) in manager.finalize_all() {
        match result {
            Ok(index) => out.push((key, index)),
            Err(err) => {
                log::error!("archive {key} not finalized: {err}");
                report.corrupt(&key, &err.to_string());
            }
        }
    }
    out
}
