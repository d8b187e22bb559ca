use anyhow::Result;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::logger::SyncLog;
use crate::sync::{RunReport, SyncEngine};

pub const DEFAULT_COUNTDOWN_SECONDS: u64 = 5;

/// Longest uninterrupted sleep before the stop flag is checked again.
const STOP_POLL: Duration = Duration::from_millis(100);

/// Something the scheduler can run on every tick.
pub trait SyncTask {
    fn run(&mut self) -> Result<RunReport>;

    fn log(&self) -> &dyn SyncLog;
}

impl SyncTask for SyncEngine {
    fn run(&mut self) -> Result<RunReport> {
        SyncEngine::run(self)
    }

    fn log(&self) -> &dyn SyncLog {
        SyncEngine::log(self)
    }
}

/// Cooperative stop flag shared with signal handlers.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying flag, for `signal_hook::flag::register`.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    CountingDown,
    Running,
    Sleeping,
    Stopped,
}

/// What to do after a run that took `elapsed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Sleep for the rest of the interval.
    Sleep(Duration),
    /// The run took longer than the interval by this much; start again now.
    Overrun(Duration),
}

pub fn pace(interval: Duration, elapsed: Duration) -> Pacing {
    if elapsed < interval {
        Pacing::Sleep(interval - elapsed)
    } else {
        Pacing::Overrun(elapsed - interval)
    }
}

/// Format as `hh:mm:ss.fff`.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    let hours = millis / 3_600_000;
    let minutes = (millis / 60_000) % 60;
    let seconds = (millis / 1000) % 60;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis % 1000)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerSummary {
    pub runs: usize,
    /// Runs that completed with at least one failed operation.
    pub failed_runs: usize,
    /// Runs that returned an error before syncing anything.
    pub aborted_runs: usize,
    pub overruns: usize,
}

/// Runs a [`SyncTask`] every `interval` until stopped.
///
/// A run that takes longer than the interval is followed immediately by the
/// next one; missed ticks are not caught up.
#[derive(Debug)]
pub struct Scheduler {
    interval: Duration,
    countdown: u64,
    max_runs: Option<usize>,
    stop: StopSignal,
    state: SchedulerState,
}

impl Scheduler {
    pub fn new(interval: Duration, stop: StopSignal) -> Self {
        Scheduler {
            interval,
            countdown: DEFAULT_COUNTDOWN_SECONDS,
            max_runs: None,
            stop,
            state: SchedulerState::Idle,
        }
    }

    /// Seconds to count down before the first run. Zero disables it.
    pub fn with_countdown(mut self, seconds: u64) -> Self {
        self.countdown = seconds;
        self
    }

    /// Stop after this many runs.
    pub fn with_max_runs(mut self, runs: usize) -> Self {
        self.max_runs = Some(runs);
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn start(&mut self, task: &mut dyn SyncTask) -> SchedulerSummary {
        let mut summary = SchedulerSummary::default();

        if self.interval.is_zero() {
            task.log().message("Interval is not set.");
            self.state = SchedulerState::Stopped;
            return summary;
        }

        self.state = SchedulerState::CountingDown;
        if !self.count_down() {
            self.state = SchedulerState::Stopped;
            return summary;
        }

        loop {
            if self.stop.is_stopped() {
                break;
            }

            self.state = SchedulerState::Running;
            let started = Instant::now();
            match task.run() {
                Ok(report) => {
                    if !report.success() {
                        summary.failed_runs += 1;
                        task.log().message(
                            "Errors during synchronization of directories, check error log for details",
                        );
                    }
                }
                Err(e) => {
                    summary.aborted_runs += 1;
                    task.log()
                        .error(&format!("Synchronization session could not start: {e:#}"));
                }
            }
            summary.runs += 1;

            if self.max_runs.is_some_and(|max| summary.runs >= max) {
                break;
            }

            match pace(self.interval, started.elapsed()) {
                Pacing::Sleep(remaining) => {
                    self.state = SchedulerState::Sleeping;
                    if !self.sleep(remaining) {
                        break;
                    }
                }
                Pacing::Overrun(excess) => {
                    summary.overruns += 1;
                    task.log().error(&format!(
                        "Synchronization took longer than the specified interval. Starting the next session with a delay of {}. Adjust the settings or system environment for correct operation.",
                        format_duration(excess)
                    ));
                }
            }
        }

        self.state = SchedulerState::Stopped;
        log::debug!("Scheduler stopped after {} run(s)", summary.runs);
        summary
    }

    /// Returns `false` if stopped during the countdown.
    fn count_down(&self) -> bool {
        for remaining in (1..=self.countdown).rev() {
            print!("\rSync session beginning in {remaining}...   ");
            let _ = std::io::stdout().flush();
            if !self.sleep(Duration::from_secs(1)) {
                println!();
                return false;
            }
        }
        if self.countdown > 0 {
            println!();
        }
        true
    }

    /// Sleep for `duration` in short slices. Returns `false` if stopped.
    fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.stop.is_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(STOP_POLL));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::MemoryLog;
    use crate::status::{Operation, Phase, PhaseOutcome};
    use anyhow::anyhow;
    use std::path::Path;

    enum Step {
        Succeed,
        Fail,
        Abort,
    }

    struct ScriptedTask {
        log: MemoryLog,
        steps: Vec<Step>,
        calls: usize,
        delay: Duration,
        stop_after: Option<(usize, StopSignal)>,
    }

    impl ScriptedTask {
        fn new(steps: Vec<Step>) -> Self {
            ScriptedTask {
                log: MemoryLog::new(),
                steps,
                calls: 0,
                delay: Duration::ZERO,
                stop_after: None,
            }
        }
    }

    impl SyncTask for ScriptedTask {
        fn run(&mut self) -> Result<RunReport> {
            let step = self.steps.get(self.calls).unwrap_or(&Step::Succeed);
            self.calls += 1;
            if let Some((after, stop)) = &self.stop_after {
                if self.calls >= *after {
                    stop.stop();
                }
            }
            thread::sleep(self.delay);

            let mut outcome = PhaseOutcome::new(Phase::ImportMissingFiles);
            match step {
                Step::Succeed => {}
                Step::Fail => {
                    outcome.record_failure(Operation::CopyFile, Path::new("x"), &anyhow!("denied"))
                }
                Step::Abort => return Err(anyhow!("archive root is read-only")),
            }
            Ok(RunReport {
                session_id: format!("run-{}", self.calls),
                phases: vec![outcome],
                log_retained: false,
                archive_retained: false,
            })
        }

        fn log(&self) -> &dyn SyncLog {
            &self.log
        }
    }

    #[test]
    fn test_pace() {
        assert_eq!(
            pace(Duration::from_secs(10), Duration::from_secs(3)),
            Pacing::Sleep(Duration::from_secs(7))
        );
        assert_eq!(
            pace(Duration::from_secs(10), Duration::from_millis(12_500)),
            Pacing::Overrun(Duration::from_millis(2_500))
        );
        assert_eq!(
            pace(Duration::from_secs(10), Duration::from_secs(10)),
            Pacing::Overrun(Duration::ZERO)
        );
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "00:00:00.000");
        assert_eq!(format_duration(Duration::from_millis(2_500)), "00:00:02.500");
        assert_eq!(
            format_duration(Duration::from_millis(3_723_045)),
            "01:02:03.045"
        );
    }

    #[test]
    fn test_zero_interval_never_runs() {
        let mut task = ScriptedTask::new(vec![]);
        let mut scheduler = Scheduler::new(Duration::ZERO, StopSignal::new()).with_countdown(0);

        let summary = scheduler.start(&mut task);

        assert_eq!(summary, SchedulerSummary::default());
        assert_eq!(task.calls, 0);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(task.log.general(), vec!["Interval is not set.".to_string()]);
    }

    #[test]
    fn test_run_limit_and_failure_counting() {
        let mut task = ScriptedTask::new(vec![Step::Succeed, Step::Fail, Step::Abort]);
        let mut scheduler = Scheduler::new(Duration::from_millis(1), StopSignal::new())
            .with_countdown(0)
            .with_max_runs(3);

        let summary = scheduler.start(&mut task);

        assert_eq!(summary.runs, 3);
        assert_eq!(summary.failed_runs, 1);
        assert_eq!(summary.aborted_runs, 1);
        assert_eq!(task.calls, 3);
        assert!(task.log.general().iter().any(|l| l.starts_with("Errors during synchronization")));
        assert!(task.log.errors().iter().any(|l| l.contains("archive root is read-only")));
    }

    #[test]
    fn test_overrun_starts_next_run_immediately() {
        let mut task = ScriptedTask::new(vec![]);
        task.delay = Duration::from_millis(20);
        let mut scheduler = Scheduler::new(Duration::from_millis(5), StopSignal::new())
            .with_countdown(0)
            .with_max_runs(2);

        let summary = scheduler.start(&mut task);

        assert_eq!(summary.runs, 2);
        assert_eq!(summary.overruns, 1);
        assert!(task
            .log
            .errors()
            .iter()
            .any(|l| l.starts_with("Synchronization took longer than the specified interval")));
    }

    #[test]
    fn test_stop_interrupts_long_sleep() {
        let stop = StopSignal::new();
        let mut task = ScriptedTask::new(vec![]);
        task.stop_after = Some((1, stop.clone()));
        let mut scheduler = Scheduler::new(Duration::from_secs(3600), stop).with_countdown(0);

        let started = Instant::now();
        let summary = scheduler.start(&mut task);

        assert_eq!(summary.runs, 1);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[test]
    fn test_stop_during_countdown_skips_runs() {
        let stop = StopSignal::new();
        stop.stop();
        let mut task = ScriptedTask::new(vec![]);
        let mut scheduler = Scheduler::new(Duration::from_secs(1), stop).with_countdown(3);

        let summary = scheduler.start(&mut task);

        assert_eq!(summary.runs, 0);
        assert_eq!(task.calls, 0);
    }
}
