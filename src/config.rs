//! Socket path resolution, well-known env var names, and defaults shared by
//! both binaries.

use std::path::PathBuf;

/// Env var the wrapper exports into the child shell so nested wrappers can
/// refuse to start (spec §4.1 step 1). Value is `<short_id>` or
/// `<short_id>:<title>`.
pub const SESSION_ENV_VAR: &str = "SCRIBE_SESSION";

/// Env var overriding the daemon socket path.
pub const SOCKET_ENV_VAR: &str = "SCRIBE_SOCKET";

/// Default ring buffer capacity (lines) for a session, used both for the
/// wrapper's local mirror and for daemon-side sessions created without an
/// explicit `buffer_size`.
pub const DEFAULT_BUFFER_CAPACITY: usize = 10_000;

/// Reconnection cadence for the wrapper's background transport task.
pub const RECONNECT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3);

/// Max lines per `replay` chunk.
pub const REPLAY_CHUNK_SIZE: usize = 500;

/// Max bytes accepted for a single newline-delimited wire record.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Default cap on `query_session` search results when `max_results` is absent.
pub const DEFAULT_MAX_RESULTS: usize = 50;

/// Default tail/page size when `count` is absent in cursor mode.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Resolve the daemon socket path.
///
/// Order: `SCRIBE_SOCKET` env var, else `$XDG_RUNTIME_DIR/scribe.sock`, else
/// `<tempdir>/scribe-<uid>/scribe.sock` where `<tempdir>` is `$TMPDIR` or
/// `/tmp`.
pub fn socket_path() -> PathBuf {
    if let Ok(p) = std::env::var(SOCKET_ENV_VAR) {
        return PathBuf::from(p);
    }

    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join("scribe.sock");
    }

    let tempdir = std::env::var("TMPDIR").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(tempdir)
        .join(format!("scribe-{}", current_uid()))
        .join("scribe.sock")
}

#[cfg(unix)]
fn current_uid() -> u32 {
    unsafe { libc::getuid() }
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}

/// Resolve the shell to spawn: `--shell` flag, else `$SHELL`, else `/bin/sh`.
pub fn resolve_shell(explicit: Option<String>) -> String {
    explicit
        .or_else(|| std::env::var("SHELL").ok())
        .unwrap_or_else(|| "/bin/sh".to_string())
}

/// Ensure the parent directory of `path` exists with mode 0700.
pub fn ensure_socket_parent_dir(path: &std::path::Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_env_override_wins() {
        // SAFETY: test-only, single-threaded access to process env.
        unsafe { std::env::set_var(SOCKET_ENV_VAR, "/tmp/custom.sock") };
        assert_eq!(socket_path(), PathBuf::from("/tmp/custom.sock"));
        unsafe { std::env::remove_var(SOCKET_ENV_VAR) };
    }

    #[test]
    fn resolve_shell_prefers_explicit() {
        assert_eq!(
            resolve_shell(Some("/bin/zsh".to_string())),
            "/bin/zsh".to_string()
        );
    }
}
