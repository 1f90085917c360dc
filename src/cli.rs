//! Clap argument definitions for the two binaries.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "scribe")]
#[command(about = "Wrap a shell in a recorded, resumable terminal session", long_about = None)]
pub struct ScribeArgs {
    /// Shell to run (defaults to $SHELL, then /bin/sh)
    #[arg(long)]
    pub shell: Option<String>,

    /// Human-readable title for this session
    #[arg(short, long)]
    pub title: Option<String>,

    /// Allow an external control host to write input into this session
    #[arg(long)]
    pub collab: bool,

    /// Line history capacity for this session's ring buffer
    #[arg(long, default_value_t = crate::config::DEFAULT_BUFFER_CAPACITY)]
    pub buffer_size: usize,

    /// Daemon socket path (defaults per SCRIBE_SOCKET / XDG_RUNTIME_DIR)
    #[arg(long)]
    pub socket: Option<PathBuf>,
}

#[derive(Parser)]
#[command(name = "scribed")]
#[command(about = "Daemon holding in-memory terminal session history", long_about = None)]
pub struct ScribedArgs {
    /// Socket path to listen on (defaults per SCRIBE_SOCKET / XDG_RUNTIME_DIR)
    #[arg(long)]
    pub socket: Option<PathBuf>,
}
