//! Daemon module - session store and dispatcher
//!
//! The scribe daemon holds every tracked session's line history in memory
//! and answers wrapper publishers and control-host queries over a Unix
//! socket.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                ┌──────────────────┐
//! │ wrapper (scribe) │◄──────────────►│      scribed      │
//! │ (publisher)      │    socket      │                   │
//! └─────────────────┘                │  ┌─────────────┐  │
//! ┌─────────────────┐                │  │    Store    │  │
//! │ tool host        │◄──────────────►│  │  Session    │  │
//! │ (control)        │                │  │  Session    │  │
//! └─────────────────┘                │  └─────────────┘  │
//!                                    └──────────────────┘
//! ```

pub mod buffer;
pub mod manager;
pub mod session;

pub use buffer::RingBuffer;
pub use manager::Store;
pub use session::{Session, SessionId};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex as AsyncMutex;

use crate::config::{self, MAX_LINE_BYTES};
use crate::protocol::{Envelope, Message, SessionInfo};
use crate::{Result, ScribeError};

/// The scribe daemon server.
pub struct Daemon {
    store: Arc<Store>,
    socket_path: PathBuf,
}

impl Daemon {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            store: Arc::new(Store::new()),
            socket_path,
        }
    }

    pub fn store(&self) -> Arc<Store> {
        self.store.clone()
    }

    /// Bind and serve forever. If a live acceptor already answers on this
    /// path, returns `AlreadyRunning`; a stale socket file is removed.
    pub async fn run(&self) -> Result<()> {
        if ping(&self.socket_path).await {
            return Err(ScribeError::AlreadyRunning(self.socket_path.clone()));
        }
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }

        config::ensure_socket_parent_dir(&self.socket_path)?;
        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| ScribeError::Daemon(e.to_string()))?;

        tracing::info!(path = %self.socket_path.display(), "daemon listening");

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let store = self.store.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, store).await {
                            tracing::warn!("connection handler error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("accept error: {}", e);
                }
            }
        }
    }
}

/// Probe whether a live daemon already answers on `path`.
async fn ping(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    UnixStream::connect(path).await.is_ok()
}

/// Strip ANSI escape sequences, matching what the wrapper does to its own
/// mirror - neither side trusts the other to have already stripped.
fn strip_ansi(line: &str) -> String {
    let stripped = strip_ansi_escapes::strip(line.as_bytes());
    String::from_utf8_lossy(&stripped).into_owned()
}

/// Per-connection dispatch state. The first `register` binds this
/// connection to a session id; every subsequent record is processed
/// against that binding.
struct Connection {
    store: Arc<Store>,
    bound: Option<Arc<Session>>,
}

async fn handle_connection(stream: UnixStream, store: Arc<Store>) -> Result<()> {
    let (read_half, write_half) = stream.into_split();
    let write_half = Arc::new(AsyncMutex::new(write_half));
    let mut reader = BufReader::new(read_half);

    let mut conn = Connection { store, bound: None };
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = read_capped_line(&mut reader, &mut line).await?;
        if n == 0 {
            break; // EOF
        }
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            continue;
        }

        let envelope = match Envelope::decode(text) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("bad message, skipping: {}", e);
                continue;
            }
        };

        if let Some(reply) = conn.dispatch(envelope, &write_half).await {
            let mut w = write_half.lock().await;
            if let Ok(encoded) = reply.encode() {
                let _ = w.write_all(encoded.as_bytes()).await;
                let _ = w.flush().await;
            }
        }
    }

    if let Some(session) = &conn.bound {
        session.detach_conn();
    }
    Ok(())
}

/// Read one line, enforcing the 1 MiB cap from spec §4.5/§6.
async fn read_capped_line(
    reader: &mut BufReader<tokio::net::unix::OwnedReadHalf>,
    out: &mut Vec<u8>,
) -> Result<usize> {
    let mut total = 0;
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(total);
        }
        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            out.extend_from_slice(&buf[..=pos]);
            total += pos + 1;
            reader.consume(pos + 1);
            return Ok(total);
        }
        total += buf.len();
        if total > MAX_LINE_BYTES {
            return Err(ScribeError::MessageTooLong(MAX_LINE_BYTES));
        }
        let consumed = buf.len();
        out.extend_from_slice(buf);
        reader.consume(consumed);
    }
}

impl Connection {
    async fn dispatch(
        &mut self,
        envelope: Envelope,
        write_half: &session::ClientConn,
    ) -> Option<Envelope> {
        match envelope.message {
            Message::Register {
                title,
                buffer_size,
                collab,
                session_id,
            } => {
                let cap = buffer_size
                    .map(|n| n as i64)
                    .unwrap_or(config::DEFAULT_BUFFER_CAPACITY as i64);
                let session = match session_id {
                    Some(id) => {
                        let (session, _reconnected) =
                            self.store.create_or_update(id, title, cap, collab);
                        session
                    }
                    None => self.store.create(title, cap, collab),
                };
                session.attach_conn(write_half.clone());
                self.bound = Some(session.clone());
                Some(Envelope::new(Message::Ack {
                    session_id: session.id.clone(),
                    short_id: session.short_id(),
                }))
            }

            Message::Output { lines } => {
                if let Some(session) = &self.bound {
                    if let Ok(mut buf) = session.buffer.lock() {
                        for line in lines {
                            buf.append(strip_ansi(&line));
                        }
                    }
                    session.touch();
                }
                None
            }

            Message::Replay { lines, last_command } => {
                if let Some(session) = &self.bound {
                    if let Ok(mut buf) = session.buffer.lock() {
                        for line in lines {
                            buf.append(strip_ansi(&line));
                        }
                    }
                    if let Some(cmd) = last_command {
                        session.set_last_command(cmd);
                    }
                    session.touch();
                }
                None
            }

            Message::Command { command } => {
                if let Some(session) = &self.bound {
                    session.set_last_command(command);
                    session.touch();
                }
                None
            }

            Message::Disconnect => {
                if let Some(session) = &self.bound {
                    session.detach_conn();
                }
                None
            }

            Message::ListSessions => {
                let sessions = self.store.list().into_iter().map(to_info).collect();
                Some(Envelope::new(Message::AckSessions { sessions }))
            }

            Message::QuerySession {
                session,
                search,
                last_n,
                cursor,
                count,
                max_results,
            } => Some(self.query_session(&session, search, last_n, cursor, count, max_results)),

            Message::WriteSession { session, text } => {
                Some(self.write_session(&session, &text).await)
            }

            // Replies are never sent *to* the daemon; ignore if a
            // misbehaving peer sends one.
            Message::Ack { .. }
            | Message::Input { .. }
            | Message::AckSessions { .. }
            | Message::AckQuery { .. }
            | Message::AckWrite { .. }
            | Message::Error { .. } => None,
        }
    }

    fn query_session(
        &self,
        reference: &str,
        search: Option<String>,
        last_n: Option<i64>,
        cursor: Option<u64>,
        count: Option<usize>,
        max_results: Option<usize>,
    ) -> Envelope {
        let session = match self.store.resolve(reference) {
            Ok(s) => s,
            Err(e) => return Envelope::new(Message::Error { message: e.to_string() }),
        };
        let Ok(buf) = session.buffer.lock() else {
            return Envelope::new(Message::Error { message: "session buffer lock poisoned".into() });
        };

        let (lines, next_cursor, has_more) = match search {
            Some(pattern) if !pattern.is_empty() => {
                let max = max_results.unwrap_or(config::DEFAULT_MAX_RESULTS);
                let hits = buf.search(&pattern, max);
                let lines = hits
                    .into_iter()
                    .map(|h| format!("[{}] {}", h.seq, h.line))
                    .collect();
                (lines, None, false)
            }
            _ => match last_n {
                Some(n) if n > 0 => (buf.last_n(n), None, false),
                _ => {
                    let from = cursor.unwrap_or(0);
                    let page =
                        buf.read_range(from, count.unwrap_or(config::DEFAULT_PAGE_SIZE) as i64);
                    (page.lines, Some(page.next_cursor), page.has_more)
                }
            },
        };

        Envelope::new(Message::AckQuery {
            session_id: session.short_id(),
            title: session.title(),
            total_lines: buf.total_seq(),
            lines,
            next_cursor,
            has_more,
        })
    }

    async fn write_session(&self, reference: &str, text: &str) -> Envelope {
        let session = match self.store.resolve(reference) {
            Ok(s) => s,
            Err(e) => return Envelope::new(Message::Error { message: e.to_string() }),
        };

        if !session.collab() {
            return Envelope::new(Message::Error {
                message: ScribeError::NotCollab(session.short_id()).to_string(),
            });
        }
        if !session.connected() {
            return Envelope::new(Message::Error {
                message: ScribeError::NotConnected(session.short_id()).to_string(),
            });
        }
        let Some(conn) = session.client_conn() else {
            return Envelope::new(Message::Error {
                message: ScribeError::NotConnected(session.short_id()).to_string(),
            });
        };

        let input = Envelope::new(Message::Input { text: text.to_string() });
        let Ok(encoded) = input.encode() else {
            return Envelope::new(Message::Error {
                message: "failed to encode input record".to_string(),
            });
        };

        let mut w = conn.lock().await;
        match w.write_all(encoded.as_bytes()).await.and(w.flush().await) {
            Ok(()) => Envelope::new(Message::AckWrite {
                success: true,
                session_id: session.short_id(),
                bytes_sent: text.len(),
            }),
            Err(e) => Envelope::new(Message::Error { message: e.to_string() }),
        }
    }
}

fn to_info(session: Arc<Session>) -> SessionInfo {
    SessionInfo {
        id: session.short_id(),
        title: session.title(),
        last_command: session.last_command(),
        line_count: session.line_count(),
        created_at: session.created_at,
        connected: session.connected(),
        collab: session.collab(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Message;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;

    async fn connect(path: &Path) -> UnixStream {
        UnixStream::connect(path).await.unwrap()
    }

    async fn send(stream: &mut UnixStream, msg: Message) {
        let env = Envelope::new(msg);
        stream.write_all(env.encode().unwrap().as_bytes()).await.unwrap();
    }

    async fn recv(stream: &mut UnixStream) -> Envelope {
        let mut buf = [0u8; 4096];
        let n = stream.read(&mut buf).await.unwrap();
        Envelope::decode(
            String::from_utf8_lossy(&buf[..n]).trim_end_matches('\n'),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn register_then_list_then_query() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scribe.sock");
        let daemon = Daemon::new(path.clone());
        let store = daemon.store();
        tokio::spawn(async move {
            let _ = daemon.run().await;
        });
        // give the listener a moment to bind
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut publisher = connect(&path).await;
        send(
            &mut publisher,
            Message::Register {
                title: Some("build".into()),
                buffer_size: None,
                collab: false,
                session_id: None,
            },
        )
        .await;
        let ack = recv(&mut publisher).await;
        let short_id = match ack.message {
            Message::Ack { short_id, .. } => short_id,
            other => panic!("expected Ack, got {other:?}"),
        };

        send(
            &mut publisher,
            Message::Output { lines: vec!["a".into(), "b".into(), "c".into()] },
        )
        .await;
        // Output has no reply; give the daemon a moment to apply it.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut control = connect(&path).await;
        send(
            &mut control,
            Message::QuerySession {
                session: short_id,
                search: None,
                last_n: Some(10),
                cursor: None,
                count: None,
                max_results: None,
            },
        )
        .await;
        let reply = recv(&mut control).await;
        match reply.message {
            Message::AckQuery { lines, .. } => assert_eq!(lines, vec!["a", "b", "c"]),
            other => panic!("expected AckQuery, got {other:?}"),
        }

        assert_eq!(store.list().len(), 1);
    }

    #[tokio::test]
    async fn write_session_rejects_non_collab() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scribe.sock");
        let daemon = Daemon::new(path.clone());
        tokio::spawn(async move {
            let _ = daemon.run().await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut publisher = connect(&path).await;
        send(
            &mut publisher,
            Message::Register { title: None, buffer_size: None, collab: false, session_id: None },
        )
        .await;
        let ack = recv(&mut publisher).await;
        let short_id = match ack.message {
            Message::Ack { short_id, .. } => short_id,
            other => panic!("expected Ack, got {other:?}"),
        };

        let mut control = connect(&path).await;
        send(
            &mut control,
            Message::WriteSession { session: short_id, text: "echo hi\n".into() },
        )
        .await;
        let reply = recv(&mut control).await;
        assert!(matches!(reply.message, Message::Error { .. }));
    }
}
