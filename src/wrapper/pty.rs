//! PTY allocation and the stdin/PTY-output stream splitters
//!
//! Owns the child shell's PTY master and implements the two small,
//! best-effort state machines the spec calls for: a *command buffer* that
//! detects command boundaries from stdin, and a *line buffer* that turns
//! raw PTY output into discrete lines.

use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::ScribeError;

/// Everything needed to drive one child shell under a PTY.
pub struct PtyHandle {
    pub master: Arc<Mutex<Box<dyn portable_pty::MasterPty + Send>>>,
    pub child: Box<dyn portable_pty::Child + Send + Sync>,
    pub reader: Box<dyn Read + Send>,
    pub writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

/// Spawn `shell` under a fresh PTY sized to `rows`x`cols`, with `extra_env`
/// exported into the child's environment.
pub fn spawn(
    shell: &str,
    rows: u16,
    cols: u16,
    workdir: &Path,
    extra_env: &[(String, String)],
) -> crate::Result<PtyHandle> {
    let pty_system = native_pty_system();
    let size = PtySize { rows, cols, pixel_width: 0, pixel_height: 0 };
    let pair = pty_system
        .openpty(size)
        .map_err(|e| ScribeError::Pty(e.to_string()))?;

    let mut cmd = CommandBuilder::new(shell);
    cmd.cwd(workdir);
    for (k, v) in extra_env {
        cmd.env(k, v);
    }

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| ScribeError::Pty(e.to_string()))?;

    let writer = pair
        .master
        .take_writer()
        .map_err(|e| ScribeError::Pty(e.to_string()))?;
    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| ScribeError::Pty(e.to_string()))?;

    Ok(PtyHandle {
        master: Arc::new(Mutex::new(pair.master)),
        child,
        reader,
        writer: Arc::new(Mutex::new(writer)),
    })
}

/// Detects command boundaries from raw stdin bytes.
///
/// A printable byte (>= 0x20) is appended; backspace (0x7F or 0x08)
/// truncates one byte; CR or LF flushes the buffer (possibly empty) and
/// resets it. This is a best-effort heuristic - history recall and
/// multi-line constructs are not tracked.
#[derive(Default)]
pub struct CommandDetector {
    buf: String,
}

impl CommandDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one stdin byte, returning a flushed command if this byte
    /// completed one.
    pub fn push(&mut self, byte: u8) -> Option<String> {
        match byte {
            b'\r' | b'\n' => Some(std::mem::take(&mut self.buf)),
            0x7f | 0x08 => {
                self.buf.pop();
                None
            }
            b if b >= 0x20 => {
                self.buf.push(b as char);
                None
            }
            _ => None,
        }
    }
}

/// Accumulates raw PTY output bytes into discrete lines. LF terminates and
/// flushes a line; CR and all other bytes are appended verbatim (PTY output
/// only ever splits on LF, never CR).
#[derive(Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a batch of raw bytes, returning every line completed within it.
    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in data {
            if b == b'\n' {
                lines.push(String::from_utf8_lossy(&self.buf).into_owned());
                self.buf.clear();
            } else {
                self.buf.push(b);
            }
        }
        lines
    }

    /// Flush a non-empty trailing line buffer (called on PTY EOF).
    pub fn flush_trailing(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&std::mem::take(&mut self.buf)).into_owned())
        }
    }
}

/// Strip ANSI escape sequences (CSI, OSC, and single-byte `ESC x`
/// sequences) from a line for local-mirror storage.
pub fn strip_ansi(line: &str) -> String {
    let stripped = strip_ansi_escapes::strip(line.as_bytes());
    String::from_utf8_lossy(&stripped).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_detector_flushes_on_cr_or_lf() {
        let mut d = CommandDetector::new();
        for b in b"ls -la" {
            assert!(d.push(*b).is_none());
        }
        assert_eq!(d.push(b'\r'), Some("ls -la".to_string()));
        assert_eq!(d.push(b'\n'), Some(String::new()));
    }

    #[test]
    fn command_detector_backspace_truncates() {
        let mut d = CommandDetector::new();
        for b in b"lsx" {
            d.push(*b);
        }
        d.push(0x7f);
        assert_eq!(d.push(b'\n'), Some("ls".to_string()));
    }

    #[test]
    fn line_splitter_keeps_cr_and_splits_only_on_lf() {
        let mut s = LineSplitter::new();
        let lines = s.feed(b"a\r\nb\nc");
        assert_eq!(lines, vec!["a\r", "b"]);
        assert_eq!(s.flush_trailing(), Some("c".to_string()));
        assert_eq!(s.flush_trailing(), None);
    }

    #[test]
    fn strip_ansi_removes_csi_and_osc() {
        let colored = "\x1b[31mred\x1b[0m";
        assert_eq!(strip_ansi(colored), "red");
        let titled = "\x1b]0;title\x07plain";
        assert_eq!(strip_ansi(titled), "plain");
    }
}
