//! Resilient session transport
//!
//! Guarantees that transient daemon unavailability never corrupts the
//! user's shell session, that after the daemon reappears the wrapper
//! reattaches to the same logical session (client-chosen `id`), and that
//! output produced during an outage becomes queryable once reattached via
//! replay of the local mirror.
//!
//! ```text
//! DISCONNECTED ──try_connect──► REGISTERING ──ack──► CONNECTED
//!     ▲  │                                            │
//!     │  └────failure────────────────────────────────┘
//!     │                                                │
//!     └──────────────socket error / EOF────────────────┘
//! ```

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use crate::config::{RECONNECT_INTERVAL, REPLAY_CHUNK_SIZE};
use crate::daemon::RingBuffer;
use crate::protocol::{Envelope, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Registering,
    Connected,
}

/// Shared, thread-safe handle to the wrapper's connection to the daemon.
/// Cloned into the reconnection thread, the PTY→daemon publisher, and (when
/// collab) the daemon→PTY input reader.
pub struct Transport {
    socket_path: PathBuf,
    id: String,
    title: Option<String>,
    collab: bool,
    buffer_size: usize,
    state: Mutex<ConnState>,
    writer: Mutex<Option<UnixStream>>,
    last_command: Mutex<Option<String>>,
    input_tx: Sender<String>,
    shutdown: AtomicBool,
}

impl Transport {
    pub fn new(
        socket_path: PathBuf,
        id: String,
        title: Option<String>,
        collab: bool,
        buffer_size: usize,
        input_tx: Sender<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            socket_path,
            id,
            title,
            collab,
            buffer_size,
            state: Mutex::new(ConnState::Disconnected),
            writer: Mutex::new(None),
            last_command: Mutex::new(None),
            input_tx,
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn is_connected(&self) -> bool {
        if let Ok(state) = self.state.lock() {
            *state == ConnState::Connected
        } else {
            false
        }
    }

    pub fn set_last_command(&self, command: Option<String>) {
        if let Ok(mut guard) = self.last_command.lock() {
            *guard = command;
        }
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Best-effort: publish a batch of freshly produced lines. Any send
    /// error transitions the transport to DISCONNECTED; the caller
    /// continues regardless (DaemonUnavailable is never fatal).
    pub fn publish_output(&self, lines: Vec<String>) {
        if lines.is_empty() || !self.is_connected() {
            return;
        }
        self.send_best_effort(Message::Output { lines });
    }

    pub fn publish_command(&self, command: String) {
        self.set_last_command(Some(command.clone()));
        if !self.is_connected() {
            return;
        }
        self.send_best_effort(Message::Command { command });
    }

    pub fn send_disconnect(&self) {
        if self.is_connected() {
            self.send_best_effort(Message::Disconnect);
        }
    }

    fn send_best_effort(&self, message: Message) {
        if self.send(message).is_err() {
            self.transition_disconnected();
        }
    }

    fn send(&self, message: Message) -> crate::Result<()> {
        let envelope = Envelope::with_session(message, self.id.clone());
        let encoded = envelope.encode()?;
        let Ok(mut guard) = self.writer.lock() else {
            return Err(crate::ScribeError::Daemon("not connected".into()));
        };
        let Some(stream) = guard.as_mut() else {
            return Err(crate::ScribeError::Daemon("not connected".into()));
        };
        stream.write_all(encoded.as_bytes())?;
        stream.flush()?;
        Ok(())
    }

    fn transition_disconnected(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = ConnState::Disconnected;
        }
        if let Ok(mut writer) = self.writer.lock() {
            *writer = None;
        }
    }

    /// Attempt one connect+register+replay cycle. Returns once the
    /// connection is established and replayed, or logs and returns on
    /// failure so the caller can retry after the reconnect interval.
    fn try_connect(self: &Arc<Self>, mirror: &Arc<Mutex<RingBuffer>>) {
        if let Ok(mut state) = self.state.lock() {
            *state = ConnState::Registering;
        }

        let stream = match UnixStream::connect(&self.socket_path) {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!("daemon connect failed: {}", e);
                if let Ok(mut state) = self.state.lock() {
                    *state = ConnState::Disconnected;
                }
                return;
            }
        };
        let mut reader = BufReader::new(stream.try_clone().expect("dup connected socket"));
        if let Ok(mut writer) = self.writer.lock() {
            *writer = Some(stream);
        }

        let register = Envelope::with_session(
            Message::Register {
                title: self.title.clone(),
                buffer_size: Some(self.buffer_size),
                collab: self.collab,
                session_id: Some(self.id.clone()),
            },
            self.id.clone(),
        );
        if self.send_raw(&register).is_err() {
            self.transition_disconnected();
            return;
        }

        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            self.transition_disconnected();
            return;
        }
        match Envelope::decode(line.trim_end()) {
            Ok(Envelope { message: Message::Ack { .. }, .. }) => {}
            _ => {
                self.transition_disconnected();
                return;
            }
        }

        if let Ok(mut state) = self.state.lock() {
            *state = ConnState::Connected;
        }
        tracing::info!("reconnected to daemon, replaying local mirror");
        self.replay(mirror);

        if self.collab {
            self.spawn_input_reader(reader);
        }
    }

    fn send_raw(&self, envelope: &Envelope) -> crate::Result<()> {
        let encoded = envelope.encode()?;
        let Ok(mut guard) = self.writer.lock() else {
            return Err(crate::ScribeError::Daemon("not connected".into()));
        };
        let Some(stream) = guard.as_mut() else {
            return Err(crate::ScribeError::Daemon("not connected".into()));
        };
        stream.write_all(encoded.as_bytes())?;
        stream.flush()?;
        Ok(())
    }

    /// Push the entire local mirror to the daemon in chunks of at most
    /// `REPLAY_CHUNK_SIZE` lines; the final chunk carries `last_command`.
    fn replay(&self, mirror: &Arc<Mutex<RingBuffer>>) {
        let lines = if let Ok(buf) = mirror.lock() {
            buf.all_lines()
        } else {
            Vec::new()
        };
        let last_command = if let Ok(guard) = self.last_command.lock() {
            guard.clone()
        } else {
            None
        };
        if lines.is_empty() {
            let _ = self.send(Message::Replay { lines: Vec::new(), last_command });
            return;
        }
        let chunks: Vec<&[String]> = lines.chunks(REPLAY_CHUNK_SIZE).collect();
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let command = if i == last { last_command.clone() } else { None };
            if self
                .send(Message::Replay { lines: chunk.to_vec(), last_command: command })
                .is_err()
            {
                self.transition_disconnected();
                return;
            }
        }
    }

    /// Spawn the daemon→wrapper input reader for collab sessions. A fresh
    /// reader is spawned on every transition into CONNECTED; it terminates
    /// on socket EOF/error, which drives the transport back to
    /// DISCONNECTED.
    fn spawn_input_reader(self: &Arc<Self>, mut reader: BufReader<UnixStream>) {
        let this = self.clone();
        std::thread::spawn(move || {
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) | Err(_) => {
                        this.transition_disconnected();
                        return;
                    }
                    Ok(_) => {
                        if let Ok(Envelope { message: Message::Input { text }, .. }) =
                            Envelope::decode(line.trim_end())
                        {
                            let _ = this.input_tx.send(text);
                        }
                    }
                }
                if this.shutdown.load(Ordering::SeqCst) {
                    return;
                }
            }
        });
    }

    /// Background reconnection loop: fires on a fixed 3s cadence while
    /// disconnected; a previous socket, if any, is closed first (handled by
    /// `try_connect` replacing `self.writer`).
    pub fn spawn_reconnect_loop(self: &Arc<Self>, mirror: Arc<Mutex<RingBuffer>>) {
        let this = self.clone();
        std::thread::spawn(move || loop {
            if this.shutdown.load(Ordering::SeqCst) {
                return;
            }
            if !this.is_connected() {
                this.try_connect(&mirror);
            }
            std::thread::sleep(RECONNECT_INTERVAL);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn starts_disconnected() {
        let (tx, _rx) = channel();
        let t = Transport::new(
            PathBuf::from("/tmp/does-not-exist.sock"),
            "id".into(),
            None,
            false,
            10,
            tx,
        );
        assert!(!t.is_connected());
    }

    #[test]
    fn publish_without_connection_is_a_noop_not_a_panic() {
        let (tx, _rx) = channel();
        let t = Transport::new(PathBuf::from("/tmp/none.sock"), "id".into(), None, false, 10, tx);
        t.publish_output(vec!["a".into()]);
        t.publish_command("ls".into());
        t.send_disconnect();
    }
}
