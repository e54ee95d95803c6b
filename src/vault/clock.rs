use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use chrono_tz::Tz;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall-clock time in the archive's reporting zone, as written into indexes
/// and part names.
pub fn local_now(clock: &dyn Clock, tz: Tz) -> DateTime<FixedOffset> {
    clock.now().with_timezone(&tz).fixed_offset()
}

pub fn local_today(clock: &dyn Clock, tz: Tz) -> NaiveDate {
    local_now(clock, tz).date_naive()
}

#[cfg(test)]
pub mod testing {
    use super::Clock;
    use chrono::{DateTime, Duration, NaiveDate, Utc};
    use std::sync::{Mutex, PoisonError};

    /// Manually driven clock; `tick` lets tests force distinct part names.
    #[derive(Debug)]
    pub struct FixedClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl FixedClock {
        pub fn at(now: DateTime<Utc>) -> Self {
            Self {
                now: Mutex::new(now),
            }
        }

        pub fn on(day: NaiveDate) -> Self {
            let morning_utc = day
                .and_hms_opt(6, 0, 0)
                .expect("valid wall time")
                .and_utc();
            Self::at(morning_utc)
        }

        pub fn tick(&self, by: Duration) {
            let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
            *now += by;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }
}
