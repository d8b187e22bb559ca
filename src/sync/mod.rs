// Module declarations
mod phases;
mod tree;

use anyhow::Result;
use chrono::{DateTime, Local};

use crate::archive::SyncSession;
use crate::filesystem::FileSystem;
use crate::logger::SyncLog;
use crate::settings::SyncConfig;
use crate::status::{OperationFailure, Phase, PhaseOutcome};
use phases::PhaseContext;

/// Result of one sync run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub session_id: String,
    /// One outcome per phase, in execution order.
    pub phases: Vec<PhaseOutcome>,
    pub log_retained: bool,
    pub archive_retained: bool,
}

impl RunReport {
    /// Whether every sub-operation of every phase succeeded.
    pub fn success(&self) -> bool {
        self.phases.iter().all(PhaseOutcome::success)
    }

    pub fn mutations(&self) -> usize {
        self.phases.iter().map(|p| p.mutations).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &OperationFailure> {
        self.phases.iter().flat_map(|p| p.failures.iter())
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseOutcome> {
        self.phases.iter().find(|p| p.phase == phase)
    }
}

/// Mirrors the source tree into the replica tree.
///
/// Every [`SyncEngine::run`] is one session: the five phases always run in
/// order, whatever failed before, and the run succeeds only if all of them
/// did.
pub struct SyncEngine {
    config: SyncConfig,
    fs: Box<dyn FileSystem>,
    log: Box<dyn SyncLog>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, fs: Box<dyn FileSystem>, log: Box<dyn SyncLog>) -> Self {
        SyncEngine { config, fs, log }
    }

    pub fn log(&self) -> &dyn SyncLog {
        self.log.as_ref()
    }

    /// Run one sync session now.
    ///
    /// Per-file failures are part of the returned report. An error is only
    /// returned when the session itself cannot be set up, in which case
    /// nothing was touched.
    pub fn run(&mut self) -> Result<RunReport> {
        self.run_at(Local::now())
    }

    /// Run one sync session, naming it after `started`.
    pub fn run_at(&mut self, started: DateTime<Local>) -> Result<RunReport> {
        let archive_root = self.config.archive_root();
        let mut session =
            SyncSession::begin(self.fs.as_ref(), self.log.as_mut(), &archive_root, started)?;

        self.log.message("================================================");
        self.log
            .message(&format!("Starting sync session {}", session.id()));
        log::debug!(
            "Syncing {} -> {} (archiving {})",
            self.config.source.display(),
            self.config.replica.display(),
            if self.config.archive_enabled { "on" } else { "off" }
        );

        let archive_dir = session.archive_dir().to_path_buf();
        let ctx = PhaseContext {
            fs: self.fs.as_ref(),
            log: self.log.as_ref(),
            source: &self.config.source,
            replica: &self.config.replica,
            archive: self.config.archive_enabled.then_some(archive_dir.as_path()),
            policy: self.config.path_policy,
        };

        let mut outcomes = Vec::with_capacity(Phase::ALL.len());
        for phase in Phase::ALL {
            let outcome = phases::run_phase(phase, &ctx);
            log::debug!(
                "Phase '{}' finished: {} change(s), {} failure(s)",
                phase,
                outcome.mutations,
                outcome.failures.len()
            );
            session.record(&outcome);
            outcomes.push(outcome);
        }

        let session_id = session.id().to_string();
        let success = outcomes.iter().all(PhaseOutcome::success);
        self.log.session("------------------------------------------------");
        self.log.session(&format!(
            "Was synchronization successful? >> {success} <<"
        ));
        self.log.session("================================================");

        let cleanup = session.finish(self.fs.as_ref(), self.log.as_mut());
        let report = RunReport {
            session_id,
            phases: outcomes,
            log_retained: cleanup.log_retained,
            archive_retained: cleanup.archive_retained,
        };

        self.log.message(&format!(
            "Sync session {} finished: {} change(s), {} failure(s)",
            report.session_id,
            report.mutations(),
            report.failures().count()
        ));

        Ok(report)
    }
}
