//! scribe: records live terminal sessions and exposes them to external tools
//!
//! Two binaries share this library. `scribe` is the wrapper: it owns a child
//! shell under a PTY, mirrors its I/O to the user's terminal, and publishes
//! the output stream to a collocated daemon. `scribed` is the daemon: it
//! holds per-session line histories in memory and answers list/query/write
//! requests from external tool hosts.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod protocol;
pub mod wrapper;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScribeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PTY error: {0}")]
    Pty(String),

    #[error("daemon error: {0}")]
    Daemon(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("message too long (> {0} bytes)")]
    MessageTooLong(usize),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("ambiguous session reference: {0}")]
    Ambiguous(String),

    #[error("session {0} is not a collab session")]
    NotCollab(String),

    #[error("session {0} is not connected")]
    NotConnected(String),

    #[error("refusing to start: already inside tracked session {0}")]
    NestedSession(String),

    #[error("a daemon is already running on {0}")]
    AlreadyRunning(std::path::PathBuf),

    #[error("setup failed: {0}")]
    SetupFailure(String),
}

pub type Result<T> = std::result::Result<T, ScribeError>;
