use super::{CycleReport, Orchestrator, ScheduleIntervals};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Source of "now" for the scheduler, so tests can drive time by hand.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// The two recurring cycles of scheduler mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleJob {
    Daily,
    MetadataOnly,
}

impl fmt::Display for CycleJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleJob::Daily => f.write_str("daily"),
            CycleJob::MetadataOnly => f.write_str("metadata-only"),
        }
    }
}

struct Entry<J> {
    interval: Duration,
    last_run: Instant,
    job: J,
}

/// Fixed-interval jobs advanced by explicit [`Scheduler::tick`] calls.
///
/// A job becomes due `interval` after it was last handed out by `tick` (or
/// after registration). Overrunning jobs are never skipped: whatever is due
/// at the next tick is returned, however late.
pub struct Scheduler<J> {
    clock: Arc<dyn Clock>,
    entries: Vec<Entry<J>>,
}

impl<J: Clone> Scheduler<J> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Vec::new(),
        }
    }

    /// Registers `job` to run every `interval`, first due one interval from now.
    pub fn every(mut self, interval: Duration, job: J) -> Self {
        let last_run = self.clock.now();
        self.entries.push(Entry {
            interval,
            last_run,
            job,
        });
        self
    }

    /// Jobs due now, in registration order. Each returned job is considered
    /// run at this instant.
    pub fn tick(&mut self) -> Vec<J> {
        let now = self.clock.now();
        let mut due = Vec::new();
        for entry in &mut self.entries {
            if now.saturating_duration_since(entry.last_run) >= entry.interval {
                entry.last_run = now;
                due.push(entry.job.clone());
            }
        }
        due
    }

    /// Time until the earliest job becomes due; zero if one already is.
    /// `None` when nothing is registered.
    pub fn next_due_in(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.entries
            .iter()
            .map(|e| (e.last_run + e.interval).saturating_duration_since(now))
            .min()
    }
}

/// Runs the daily cycle immediately, then re-runs the daily and
/// metadata-only cycles on their intervals until the orchestrator's cancel
/// token fires. Pipeline failures never end the loop.
///
/// Returns the report of the last cycle that ran.
pub async fn run_scheduler(
    orchestrator: &Orchestrator,
    intervals: ScheduleIntervals,
    clock: Arc<dyn Clock>,
) -> CycleReport {
    let cancel = orchestrator.cancel_token().clone();
    info!(
        "Scheduler started: daily every {:?}, metadata every {:?}",
        intervals.daily, intervals.metadata
    );

    let mut last = orchestrator.run_daily().await;
    let mut scheduler = Scheduler::new(clock)
        .every(intervals.daily, CycleJob::Daily)
        .every(intervals.metadata, CycleJob::MetadataOnly);

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let due = scheduler.tick();
        let daily_due = due.contains(&CycleJob::Daily);
        for job in due {
            if cancel.is_cancelled() {
                break;
            }
            last = match job {
                CycleJob::Daily => orchestrator.run_daily().await,
                // The daily cycle already ends with the metadata pipeline.
                CycleJob::MetadataOnly if daily_due => {
                    debug!("Skipping metadata-only cycle, daily cycle just ran it");
                    continue;
                }
                CycleJob::MetadataOnly => orchestrator.run_metadata_only().await,
            };
        }

        let wait = scheduler
            .next_due_in()
            .map_or(intervals.tick, |d| d.min(intervals.tick));
        debug!("Scheduler sleeping for {:?}", wait);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }

    info!("Scheduler stopped");
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeClock {
        now: Mutex<Instant>,
    }

    impl FakeClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(Instant::now()),
            })
        }

        fn advance(&self, by: Duration) {
            *self.now.lock().unwrap() += by;
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }

    const HOUR: Duration = Duration::from_secs(3600);

    fn cycles(clock: &Arc<FakeClock>) -> Scheduler<CycleJob> {
        Scheduler::new(clock.clone() as Arc<dyn Clock>)
            .every(24 * HOUR, CycleJob::Daily)
            .every(6 * HOUR, CycleJob::MetadataOnly)
    }

    #[test]
    fn nothing_is_due_right_after_registration() {
        let clock = FakeClock::new();
        let mut scheduler = cycles(&clock);
        assert!(scheduler.tick().is_empty());
        assert_eq!(scheduler.next_due_in(), Some(6 * HOUR));
    }

    #[test]
    fn jobs_become_due_on_their_own_cadence() {
        let clock = FakeClock::new();
        let mut scheduler = cycles(&clock);

        clock.advance(6 * HOUR);
        assert_eq!(scheduler.tick(), vec![CycleJob::MetadataOnly]);
        assert!(scheduler.tick().is_empty());

        clock.advance(12 * HOUR);
        assert_eq!(scheduler.tick(), vec![CycleJob::MetadataOnly]);

        clock.advance(6 * HOUR);
        assert_eq!(
            scheduler.tick(),
            vec![CycleJob::Daily, CycleJob::MetadataOnly]
        );
    }

    #[test]
    fn overrun_is_not_skipped() {
        let clock = FakeClock::new();
        let mut scheduler = cycles(&clock);

        // A run that takes far longer than every interval.
        clock.advance(30 * HOUR);
        assert_eq!(
            scheduler.tick(),
            vec![CycleJob::Daily, CycleJob::MetadataOnly]
        );
        assert_eq!(scheduler.next_due_in(), Some(6 * HOUR));
    }

    #[test]
    fn next_due_in_counts_down() {
        let clock = FakeClock::new();
        let scheduler = cycles(&clock);
        clock.advance(5 * HOUR);
        assert_eq!(scheduler.next_due_in(), Some(HOUR));
        clock.advance(2 * HOUR);
        assert_eq!(scheduler.next_due_in(), Some(Duration::ZERO));
    }

    #[test]
    fn empty_scheduler_has_nothing_due() {
        let clock = FakeClock::new();
        let mut scheduler: Scheduler<CycleJob> = Scheduler::new(clock);
        assert!(scheduler.tick().is_empty());
        assert!(scheduler.next_due_in().is_none());
    }
}
