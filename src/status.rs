use std::fmt;
use std::path::PathBuf;

/// The five phases of a sync run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    PruneDirectories,
    RecreateDirectories,
    RemoveOverheadFiles,
    ReplaceEditedFiles,
    ImportMissingFiles,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::PruneDirectories,
        Phase::RecreateDirectories,
        Phase::RemoveOverheadFiles,
        Phase::ReplaceEditedFiles,
        Phase::ImportMissingFiles,
    ];
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::PruneDirectories => "prune directories",
            Phase::RecreateDirectories => "recreate directories",
            Phase::RemoveOverheadFiles => "remove overhead files",
            Phase::ReplaceEditedFiles => "replace edited files",
            Phase::ImportMissingFiles => "import missing files",
        };
        f.write_str(name)
    }
}

/// A single filesystem sub-operation inside a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Scan,
    ArchiveDirectory,
    DeleteDirectory,
    CreateDirectory,
    ArchiveFile,
    DeleteFile,
    Fingerprint,
    CopyFile,
}

impl Operation {
    /// Whether a success of this operation changes the replica or archive.
    pub fn is_mutation(self) -> bool {
        !matches!(self, Operation::Scan | Operation::Fingerprint)
    }
}

#[derive(Debug, Clone)]
pub struct OperationFailure {
    pub operation: Operation,
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of one phase: every failed sub-operation plus the number of
/// successful mutations.
///
/// Failures never stop the phase; the phase succeeded iff no failure was
/// recorded.
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub phase: Phase,
    pub failures: Vec<OperationFailure>,
    pub mutations: usize,
}

impl PhaseOutcome {
    pub fn new(phase: Phase) -> Self {
        PhaseOutcome {
            phase,
            failures: Vec::new(),
            mutations: 0,
        }
    }

    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn record_success(&mut self, operation: Operation) {
        if operation.is_mutation() {
            self.mutations += 1;
        }
    }

    pub fn record_failure(
        &mut self,
        operation: Operation,
        path: impl Into<PathBuf>,
        error: &anyhow::Error,
    ) {
        self.failures.push(OperationFailure {
            operation,
            path: path.into(),
            error: format!("{error:#}"),
        });
    }
}
