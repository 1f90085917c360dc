//! Wrapper module - PTY ownership, stream splitting, and the resilient
//! transport to the daemon.
//!
//! ```text
//! stdin ──► [CommandDetector] ──► transport.publish_command ──► daemon
//!   │
//!   └────────────────────────────► PTY master
//!
//! PTY master ──► stdout
//!            └─► [LineSplitter] ──► local mirror (stripped)
//!                                └─► transport.publish_output (pre-strip) ──► daemon
//!
//! daemon ──► input ──► PTY master   (collab sessions only)
//! ```

pub mod prompt;
pub mod pty;
pub mod transport;

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use crate::config::{self, DEFAULT_BUFFER_CAPACITY, SESSION_ENV_VAR};
use crate::daemon::RingBuffer;
use crate::{Result, ScribeError};
use pty::{CommandDetector, LineSplitter};
use transport::Transport;

pub struct WrapperConfig {
    pub shell: Option<String>,
    pub title: Option<String>,
    pub collab: bool,
    pub buffer_size: usize,
    pub socket_path: std::path::PathBuf,
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self {
            shell: None,
            title: None,
            collab: false,
            buffer_size: DEFAULT_BUFFER_CAPACITY,
            socket_path: config::socket_path(),
        }
    }
}

/// Restores the terminal to cooked mode on drop, regardless of which exit
/// path got us here.
struct RawModeGuard;

impl RawModeGuard {
    fn enter() -> std::io::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

/// Run the wrapper to completion, returning the exit code the calling
/// binary should use: the child's exit code on an orderly exit, 1 otherwise.
pub fn run(cfg: WrapperConfig) -> Result<i32> {
    // Step 1: refuse to start inside an already-tracked session.
    if let Ok(existing) = std::env::var(SESSION_ENV_VAR) {
        return Err(ScribeError::NestedSession(existing));
    }

    // Step 2: fresh 128-bit id.
    let id = uuid::Uuid::new_v4().simple().to_string();
    let short_id: String = id.chars().take(8).collect();

    // Step 3: local mirror, used regardless of daemon connectivity.
    let mirror = Arc::new(Mutex::new(RingBuffer::new(cfg.buffer_size as i64)));

    // Steps 4-5: initial connection attempt + reconnection task.
    let (input_tx, input_rx) = mpsc::channel::<String>();
    let transport = Transport::new(
        cfg.socket_path.clone(),
        id.clone(),
        cfg.title.clone(),
        cfg.collab,
        cfg.buffer_size,
        input_tx,
    );
    transport.spawn_reconnect_loop(mirror.clone());

    // Step 6: resolve shell, set up prompt decoration + nested-session env.
    let shell = config::resolve_shell(cfg.shell.clone());
    let (prompt_setup, extra_env) = prompt::setup_prompt(&shell, &short_id, cfg.title.as_deref())?;

    let (cols, rows) = crossterm::terminal::size().unwrap_or((80, 24));
    let workdir = std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));

    // Step 7: spawn the child under a PTY.
    let mut handle = match pty::spawn(&shell, rows, cols, &workdir, &extra_env) {
        Ok(h) => h,
        Err(e) => {
            prompt_setup.cleanup();
            tracing::error!("failed to spawn PTY: {}", e);
            return Ok(1);
        }
    };

    // Step 8: resize propagation, including one synthetic initial call so
    // the daemon side (and any attached viewer) sees a size before the
    // first real SIGWINCH, if one ever arrives.
    let resize_stop = Arc::new(AtomicBool::new(false));
    spawn_resize_handler(handle.master.clone(), resize_stop.clone(), (cols, rows));

    // Step 9: raw mode for stdin, restored on every exit path via Drop.
    let _raw_guard = RawModeGuard::enter().map_err(ScribeError::Io)?;

    let running = Arc::new(AtomicBool::new(true));

    spawn_stdin_copier(handle.writer.clone(), transport.clone(), running.clone());
    let pty_thread =
        spawn_pty_copier(handle.reader, mirror.clone(), transport.clone(), running.clone());
    spawn_input_writer(input_rx, handle.writer.clone(), running.clone());

    let exit_status = handle.child.wait();

    // Shutdown sequence: stop resize handler, close PTY master to unblock
    // the copier, await it, restore tty (RawModeGuard on drop), run prompt
    // cleanup, stop reconnection, best-effort disconnect.
    running.store(false, Ordering::SeqCst);
    resize_stop.store(true, Ordering::SeqCst);
    drop(handle.master);
    let _ = pty_thread.join();
    prompt_setup.cleanup();
    transport.stop();
    transport.send_disconnect();

    match exit_status {
        Ok(status) => Ok(if status.success() { 0 } else { 1 }),
        Err(_) => Ok(1),
    }
}

/// Polls the real terminal size and propagates changes to the PTY master.
/// Runs the synthetic initial propagation (the size captured at startup)
/// before entering the poll loop, so the child sees a size even if the
/// terminal never resizes again.
fn spawn_resize_handler(
    master: Arc<Mutex<Box<dyn portable_pty::MasterPty + Send>>>,
    stop: Arc<AtomicBool>,
    initial: (u16, u16),
) {
    std::thread::spawn(move || {
        let mut last = initial;
        apply_resize(&master, last);
        while !stop.load(Ordering::SeqCst) {
            std::thread::sleep(std::time::Duration::from_millis(250));
            if let Ok(size) = crossterm::terminal::size()
                && size != last
            {
                last = size;
                apply_resize(&master, last);
            }
        }
    });
}

fn apply_resize(master: &Arc<Mutex<Box<dyn portable_pty::MasterPty + Send>>>, (cols, rows): (u16, u16)) {
    if let Ok(master) = master.lock() {
        let _ = master.resize(portable_pty::PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        });
    }
}

fn spawn_stdin_copier(
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    transport: Arc<Transport>,
    running: Arc<AtomicBool>,
) {
    std::thread::spawn(move || {
        let mut detector = CommandDetector::new();
        let stdin = std::io::stdin();
        let mut lock = stdin.lock();
        let mut buf = [0u8; 1];
        while running.load(Ordering::SeqCst) {
            match lock.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    if let Ok(mut w) = writer.lock() {
                        let _ = w.write_all(&buf);
                        let _ = w.flush();
                    }
                    if let Some(cmd) = detector.push(buf[0]) {
                        transport.publish_command(cmd);
                    }
                }
                Err(_) => break,
            }
        }
    });
}

fn spawn_pty_copier(
    mut reader: Box<dyn Read + Send>,
    mirror: Arc<Mutex<RingBuffer>>,
    transport: Arc<Transport>,
    running: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut splitter = LineSplitter::new();
        let mut stdout = std::io::stdout();
        let mut buf = [0u8; 4096];
        while running.load(Ordering::SeqCst) {
            match reader.read(&mut buf) {
                Ok(0) => {
                    if let Some(line) = splitter.flush_trailing() {
                        publish_lines(&mirror, &transport, vec![line]);
                    }
                    break;
                }
                Ok(n) => {
                    let _ = stdout.write_all(&buf[..n]);
                    let _ = stdout.flush();
                    let lines = splitter.feed(&buf[..n]);
                    if !lines.is_empty() {
                        publish_lines(&mirror, &transport, lines);
                    }
                }
                Err(_) => break,
            }
        }
    })
}

fn publish_lines(mirror: &Arc<Mutex<RingBuffer>>, transport: &Arc<Transport>, lines: Vec<String>) {
    if let Ok(mut buf) = mirror.lock() {
        for line in &lines {
            buf.append(pty::strip_ansi(line));
        }
    }
    transport.publish_output(lines);
}

fn spawn_input_writer(
    rx: mpsc::Receiver<String>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    running: Arc<AtomicBool>,
) {
    std::thread::spawn(move || {
        while running.load(Ordering::SeqCst) {
            match rx.recv_timeout(std::time::Duration::from_millis(200)) {
                Ok(text) => {
                    if let Ok(mut w) = writer.lock() {
                        let _ = w.write_all(text.as_bytes());
                        let _ = w.flush();
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    });
}
