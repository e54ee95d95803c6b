use crate::error::VaultErrorCode;
use crate::vault::manager::{AppendOutcome, ArchiveError, ArchiveManager};
use crate::vault::report::RunReport;
use crate::vault::retry::{Fault, RetryPolicy, with_retry};
use crate::vault::scraper::Scraper;
use crate::vault::warn;
use anyhow::Result;
use chrono::{Datelike, NaiveDate};
use crossbeam_channel::{bounded, unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

/// Records filed this many years away from the day they were scraped on are
/// almost certainly misattributed upstream.
pub const SUSPECT_YEAR_GAP: i32 = 100;

/// Cooperative cancellation: a wall-clock deadline plus a manual trip.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    deadline: Option<Instant>,
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new(deadline: Option<Instant>) -> Self {
        Self {
            deadline,
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stopped(&self) -> bool {
        self.flag.load(Ordering::Relaxed) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn trip(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayStatus {
    /// Every record of the day was attempted.
    Completed,
    /// Upstream kept failing; nothing from the day was archived.
    Skipped { reason: String },
    /// The stop signal fired before the day finished.
    Interrupted,
}

#[derive(Debug)]
pub struct DayResult {
    pub day: NaiveDate,
    pub status: DayStatus,
}

pub struct Pipeline<'a> {
    manager: &'a ArchiveManager,
    scraper: &'a dyn Scraper,
    options: PipelineOptions,
}

fn error_code(err: &ArchiveError) -> VaultErrorCode {
    match err {
        ArchiveError::Backend(_) => VaultErrorCode::E101BackendFault,
        ArchiveError::CorruptIndex { .. } => VaultErrorCode::E102CorruptIndex,
        ArchiveError::Staging { .. } => VaultErrorCode::E104StagingFault,
        ArchiveError::InvalidMember(_) => VaultErrorCode::E105InvalidMember,
    }
}

impl<'a> Pipeline<'a> {
    pub fn new(manager: &'a ArchiveManager, scraper: &'a dyn Scraper, options: PipelineOptions) -> Self {
        Self {
            manager,
            scraper,
            options,
        }
    }

    /// Scrapes `days` on a bounded worker pool and appends every record.
    /// `on_day` runs on the calling thread as each day finishes, in
    /// completion order; an error from it stops dispatch and is returned
    /// once in-flight days drain.
    pub fn run<F>(&self, days: Vec<NaiveDate>, stop: &StopSignal, mut on_day: F) -> Result<RunReport>
    where
        F: FnMut(&DayResult) -> Result<()>,
    {
        let workers = self.options.concurrency.max(1);
        let (job_tx, job_rx) = bounded::<NaiveDate>(workers);
        let (result_tx, result_rx) = unbounded::<(DayResult, RunReport)>();
        let mut total = RunReport::default();
        let mut first_err = None;

        thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    for day in job_rx.iter() {
                        let outcome = if stop.stopped() {
                            let mut report = RunReport::default();
                            report.interrupted_days += 1;
                            (
                                DayResult {
                                    day,
                                    status: DayStatus::Interrupted,
                                },
                                report,
                            )
                        } else {
                            self.process_day(day, stop)
                        };
                        if result_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(job_rx);
            drop(result_tx);

            scope.spawn(move || {
                for day in days {
                    if stop.stopped() || job_tx.send(day).is_err() {
                        break;
                    }
                }
            });

            for (result, report) in result_rx.iter() {
                total.absorb(report);
                if first_err.is_some() {
                    continue;
                }
                if let Err(err) = on_day(&result) {
                    log::error!("stopping dispatch after {}: {err:#}", result.day);
                    stop.trip();
                    first_err = Some(err);
                }
            }
        });

        match first_err {
            Some(err) => Err(err),
            None => Ok(total),
        }
    }

    fn process_day(&self, day: NaiveDate, stop: &StopSignal) -> (DayResult, RunReport) {
        let mut report = RunReport::default();
        let retry = &self.options.retry;

        let harvest = with_retry(retry, &format!("scrape {day}"), |_| {
            self.scraper.scrape_day(day, self.manager).map_err(|fault| {
                if fault.retryable {
                    Fault::Retryable(fault)
                } else {
                    Fault::Fatal(fault)
                }
            })
        });
        let harvest = match harvest {
            Ok(harvest) => harvest,
            Err(fault) => {
                warn::emit(
                    VaultErrorCode::E103UpstreamSkipped,
                    "scrape",
                    "",
                    "",
                    &fault.reason,
                    &fault.to_string(),
                );
                report.skip_day(day, fault.reason.clone());
                let status = DayStatus::Skipped {
                    reason: fault.reason,
                };
                return (DayResult { day, status }, report);
            }
        };

        for (key, _) in &harvest.already_archived {
            report.already_archived(key);
        }

        for record in harvest.records {
            if stop.stopped() {
                report.interrupted_days += 1;
                let status = DayStatus::Interrupted;
                return (DayResult { day, status }, report);
            }

            let key = record.archive_key();
            let name = record.file_name.as_str();
            if (record.year - day.year()).abs() >= SUSPECT_YEAR_GAP {
                warn::emit(
                    VaultErrorCode::E106SuspectYear,
                    "classify",
                    &key.to_string(),
                    name,
                    &format!("filed under {} but scraped on {day}", record.year),
                    "",
                );
                report.suspect(&key, name, day);
            }

            let appended = with_retry(retry, &format!("append {key}/{name}"), |_| {
                self.manager
                    .append_file(&key, name, &record.bytes, Some(record.decision_date))
                    .map_err(ArchiveError::into_fault)
            });
            match appended {
                Ok(AppendOutcome::Appended { .. }) => {
                    report.appended(&key, name, record.bytes.len() as u64)
                }
                Ok(AppendOutcome::AlreadyExists) => report.already_archived(&key),
                Err(err) => {
                    if let ArchiveError::CorruptIndex { reason, .. } = &err {
                        report.corrupt(&key, reason);
                    }
                    warn::emit(
                        error_code(&err),
                        "append",
                        &key.to_string(),
                        name,
                        "member not archived",
                        &err.to_string(),
                    );
                    report.failed(&key, name);
                }
            }
        }

        report.days_completed += 1;
        let status = DayStatus::Completed;
        (DayResult { day, status }, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::clock::testing::FixedClock;
    use crate::vault::layout::ArchiveKey;
    use crate::vault::scraper::testing::ScriptedScraper;
    use crate::vault::store::testing::MemoryObjectStore;
    use std::time::Duration;
    use tempfile::tempdir;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, day).unwrap()
    }

    fn options(concurrency: usize) -> PipelineOptions {
        PipelineOptions {
            concurrency,
            retry: RetryPolicy::immediate(3),
        }
    }

    fn manager(store: Arc<MemoryObjectStore>, staging: &std::path::Path) -> ArchiveManager {
        ArchiveManager::new(store, staging).with_clock(Arc::new(FixedClock::on(d(6, 30))))
    }

    #[test]
    fn every_day_is_reported_and_records_are_appended() {
        let tmp = tempdir().expect("tempdir");
        let store = Arc::new(MemoryObjectStore::new());
        let manager = manager(store.clone(), tmp.path());
        let scraper = ScriptedScraper::new()
            .record(d(1, 1), "english", "a.pdf", 3)
            .record(d(1, 2), "english", "b.pdf", 4)
            .record(d(1, 2), "metadata", "b.json", 2);

        let mut seen = Vec::new();
        let report = Pipeline::new(&manager, &scraper, options(3))
            .run(vec![d(1, 1), d(1, 2), d(1, 3)], &StopSignal::default(), |result| {
                seen.push((result.day, result.status.clone()));
                Ok(())
            })
            .expect("run");

        seen.sort_by_key(|(day, _)| *day);
        assert_eq!(
            seen,
            vec![
                (d(1, 1), DayStatus::Completed),
                (d(1, 2), DayStatus::Completed),
                (d(1, 3), DayStatus::Completed),
            ]
        );
        assert_eq!(report.total_appended(), 3);
        assert_eq!(report.days_completed, 3);
        assert!(manager.exists(&ArchiveKey::new(2025, "metadata"), "b.json").expect("exists"));
    }

    #[test]
    fn transient_upstream_faults_are_retried() {
        let tmp = tempdir().expect("tempdir");
        let manager = manager(Arc::new(MemoryObjectStore::new()), tmp.path());
        let scraper = ScriptedScraper::new()
            .record(d(1, 1), "english", "a.pdf", 3)
            .fail(d(1, 1), 2, true);

        let report = Pipeline::new(&manager, &scraper, options(1))
            .run(vec![d(1, 1)], &StopSignal::default(), |_| Ok(()))
            .expect("run");
        assert_eq!(report.total_appended(), 1);
        assert_eq!(scraper.calls().len(), 3);
    }

    #[test]
    fn exhausted_upstream_faults_skip_the_day() {
        let tmp = tempdir().expect("tempdir");
        let manager = manager(Arc::new(MemoryObjectStore::new()), tmp.path());
        let scraper = ScriptedScraper::new()
            .record(d(1, 1), "english", "a.pdf", 3)
            .record(d(1, 2), "english", "b.pdf", 3)
            .fail(d(1, 1), 10, true);

        let mut statuses = Vec::new();
        let report = Pipeline::new(&manager, &scraper, options(2))
            .run(vec![d(1, 1), d(1, 2)], &StopSignal::default(), |result| {
                statuses.push((result.day, result.status.clone()));
                Ok(())
            })
            .expect("run");
        statuses.sort_by_key(|(day, _)| *day);
        assert!(matches!(statuses[0].1, DayStatus::Skipped { .. }));
        assert_eq!(statuses[1].1, DayStatus::Completed);
        assert_eq!(report.skipped_days.len(), 1);
        assert_eq!(report.total_appended(), 1);
    }

    #[test]
    fn backend_faults_fail_the_member_not_the_run() {
        let tmp = tempdir().expect("tempdir");
        let store = Arc::new(MemoryObjectStore::new());
        store.fail_puts("english.tar", 3);
        let manager = manager(store, tmp.path());
        let scraper = ScriptedScraper::new()
            .record(d(1, 1), "english", "a.pdf", 3)
            .record(d(1, 1), "regional", "a.pdf", 3);

        let report = Pipeline::new(&manager, &scraper, options(1))
            .run(vec![d(1, 1)], &StopSignal::default(), |_| Ok(()))
            .expect("run");
        assert_eq!(report.archives["2025/english"].failed_files, vec!["a.pdf"]);
        assert_eq!(report.archives["2025/regional"].appended, 1);
        assert_eq!(report.days_completed, 1);
    }

    #[test]
    fn suspect_years_are_flagged_but_still_archived() {
        let tmp = tempdir().expect("tempdir");
        let manager = manager(Arc::new(MemoryObjectStore::new()), tmp.path());
        let scraper = ScriptedScraper::new().record_in_year(d(1, 1), "english", "old.pdf", 1925);

        let report = Pipeline::new(&manager, &scraper, options(1))
            .run(vec![d(1, 1)], &StopSignal::default(), |_| Ok(()))
            .expect("run");
        assert_eq!(report.suspect_records.len(), 1);
        assert_eq!(report.suspect_records[0].archive, "1925/english");
        assert!(manager.exists(&ArchiveKey::new(1925, "english"), "old.pdf").expect("exists"));
    }

    #[test]
    fn expired_deadline_interrupts_instead_of_completing() {
        let tmp = tempdir().expect("tempdir");
        let manager = manager(Arc::new(MemoryObjectStore::new()), tmp.path());
        let scraper = ScriptedScraper::new().record(d(1, 1), "english", "a.pdf", 3);
        let stop = StopSignal::new(Some(Instant::now() - Duration::from_secs(1)));

        let mut completed = 0;
        let report = Pipeline::new(&manager, &scraper, options(2))
            .run(vec![d(1, 1), d(1, 2)], &stop, |result| {
                if result.status == DayStatus::Completed {
                    completed += 1;
                }
                Ok(())
            })
            .expect("run");
        assert_eq!(completed, 0);
        assert_eq!(report.total_appended(), 0);
    }

    #[test]
    fn callback_errors_stop_the_run() {
        let tmp = tempdir().expect("tempdir");
        let manager = manager(Arc::new(MemoryObjectStore::new()), tmp.path());
        let scraper = ScriptedScraper::new();
        let days: Vec<_> = (1..=20).map(|day| d(1, day)).collect();

        let mut calls = 0;
        let err = Pipeline::new(&manager, &scraper, options(1))
            .run(days, &StopSignal::default(), |_| {
                calls += 1;
                anyhow::bail!("checkpoint disk full")
            })
            .unwrap_err();
        assert!(err.to_string().contains("checkpoint disk full"));
        assert_eq!(calls, 1);
    }
}
