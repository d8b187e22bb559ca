use std::fs;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use dirsync::config::LogLayout;
use dirsync::filesystem::LocalFs;
use dirsync::logger::FileLog;
use dirsync::paths::PathPolicy;
use dirsync::scheduler::{Scheduler, SchedulerState, StopSignal};
use dirsync::settings::SyncConfig;
use dirsync::sync::SyncEngine;

fn engine_in(temp: &TempDir, interval: Duration) -> SyncEngine {
    let source = temp.path().join("source");
    let replica = temp.path().join("replica");
    let logs = temp.path().join("logs");
    for dir in [&source, &replica, &logs] {
        fs::create_dir_all(dir).unwrap();
    }
    fs::write(source.join("a.txt"), "hello").unwrap();

    let layout = LogLayout::new(&logs);
    layout.ensure().unwrap();
    let config = SyncConfig {
        source,
        replica,
        logs,
        interval,
        archive_enabled: true,
        path_policy: PathPolicy::CaseSensitive,
    };
    SyncEngine::new(
        config,
        Box::new(LocalFs::new()),
        Box::new(FileLog::new(layout).unwrap()),
    )
}

#[test]
fn test_single_run_mirrors_and_stops() {
    let temp = TempDir::new().unwrap();
    let mut engine = engine_in(&temp, Duration::from_secs(3600));
    let mut scheduler = Scheduler::new(Duration::from_secs(3600), StopSignal::new())
        .with_countdown(0)
        .with_max_runs(1);

    let started = Instant::now();
    let summary = scheduler.start(&mut engine);

    assert_eq!(summary.runs, 1);
    assert_eq!(summary.failed_runs, 0);
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert_eq!(
        fs::read_to_string(temp.path().join("replica/a.txt")).unwrap(),
        "hello"
    );
}

#[test]
fn test_stop_signal_from_another_thread() {
    let temp = TempDir::new().unwrap();
    let mut engine = engine_in(&temp, Duration::from_millis(20));
    let stop = StopSignal::new();
    let mut scheduler = Scheduler::new(Duration::from_millis(20), stop.clone()).with_countdown(0);

    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        stop.stop();
    });
    let summary = scheduler.start(&mut engine);
    stopper.join().unwrap();

    assert!(summary.runs >= 1);
    assert_eq!(summary.aborted_runs, 0);
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
}
