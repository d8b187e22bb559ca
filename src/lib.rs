//! # dirsync
//!
//! One-way, periodic directory mirroring with archiving.
//!
//! ## Overview
//!
//! `dirsync` keeps a replica directory identical to a source directory. On every
//! tick of a fixed interval it compares the two trees and brings the replica in
//! line with the source. Content that is removed from or replaced in the replica
//! can be moved into a per-session archive instead of being deleted, so nothing
//! that lived in the replica is lost.
//!
//! ## Architecture
//!
//! - Configuration ([`config`], [`settings`], [`onboarding`])
//! - Filesystem access and path comparison ([`filesystem`], [`paths`], [`hash`])
//! - The sync run and its outcome ([`sync`], [`status`], [`archive`])
//! - Periodic execution ([`scheduler`])
//! - Logging ([`logger`])

/// Sync sessions: identifiers, per-session archive directories, and cleanup of
/// sessions that changed nothing.
pub mod archive;

/// Platform-agnostic configuration directory management and the log directory
/// layout.
pub mod config;

/// Filesystem capability used by the sync engine, with a local and an
/// in-memory implementation.
pub mod filesystem;

/// SHA-256 content fingerprints.
pub mod hash;

/// Logging configuration and utilities.
///
/// Sets up console logging (configurable via `RUST_LOG`) and the general,
/// error, and per-session log files a sync run writes to. Includes log
/// rotation when files exceed size limits.
pub mod logger;

/// Interactive configuration prompts.
pub mod onboarding;

/// Path normalization and case-sensitivity policy.
pub mod paths;

/// Periodic execution of sync runs with a cooperative stop signal.
pub mod scheduler;

/// Persisted configuration: loading, merging, validation, and display.
pub mod settings;

/// Phases, operations, and per-phase outcomes of a sync run.
pub mod status;

/// The sync engine.
///
/// Each run executes five phases in order against the current state of the
/// trees:
/// 1. Remove replica directories missing from the source
/// 2. Recreate source directories missing from the replica
/// 3. Remove replica files missing from the source
/// 4. Replace replica files whose content differs from the source
/// 5. Copy source files missing from the replica
pub mod sync;
