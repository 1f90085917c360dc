//! Daemon-side session state
//!
//! A Session represents one tracked shell. It owns a RingBuffer of its
//! output history and, while a wrapper holds the connection, a handle used
//! to deliver input back for collab sessions. A Session is never removed by
//! disconnect - only by an explicit `remove(id)` on the Store.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::Mutex as AsyncMutex;

use super::buffer::RingBuffer;

pub type SessionId = String;

/// Handle used to deliver `input` records to the wrapper currently holding
/// this session's connection. Guarded by its own lock so concurrent
/// `write_session` calls serialize and a record is never split on the wire.
pub type ClientConn = Arc<AsyncMutex<OwnedWriteHalf>>;

/// One tracked shell.
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    inner: Mutex<Inner>,
    pub buffer: Mutex<RingBuffer>,
}

struct Inner {
    title: Option<String>,
    last_activity: DateTime<Utc>,
    last_command: Option<String>,
    connected: bool,
    collab: bool,
    client_conn: Option<ClientConn>,
}

impl Session {
    pub fn new(id: SessionId, title: Option<String>, cap: i64, collab: bool) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            inner: Mutex::new(Inner {
                title,
                last_activity: now,
                last_command: None,
                connected: true,
                collab,
                client_conn: None,
            }),
            buffer: Mutex::new(RingBuffer::new(cap)),
        }
    }

    /// First 8 hex characters of `id`.
    pub fn short_id(&self) -> String {
        short_id_of(&self.id)
    }

    pub fn title(&self) -> Option<String> {
        if let Ok(inner) = self.inner.lock() {
            inner.title.clone()
        } else {
            None
        }
    }

    pub fn connected(&self) -> bool {
        if let Ok(inner) = self.inner.lock() {
            inner.connected
        } else {
            false
        }
    }

    pub fn collab(&self) -> bool {
        if let Ok(inner) = self.inner.lock() {
            inner.collab
        } else {
            false
        }
    }

    pub fn last_command(&self) -> Option<String> {
        if let Ok(inner) = self.inner.lock() {
            inner.last_command.clone()
        } else {
            None
        }
    }

    pub fn set_last_command(&self, command: String) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.last_command = Some(command);
        }
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        if let Ok(inner) = self.inner.lock() {
            inner.last_activity
        } else {
            self.created_at
        }
    }

    pub fn touch(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.last_activity = Utc::now();
        }
    }

    /// Bind a fresh connection handle, marking the session connected.
    pub fn attach_conn(&self, conn: ClientConn) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.client_conn = Some(conn);
            inner.connected = true;
        }
    }

    /// Clear the connection handle, marking the session disconnected.
    /// Per spec, disconnect never removes the Session itself.
    pub fn detach_conn(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.client_conn = None;
            inner.connected = false;
        }
    }

    pub fn client_conn(&self) -> Option<ClientConn> {
        if let Ok(inner) = self.inner.lock() {
            inner.client_conn.clone()
        } else {
            None
        }
    }

    /// Apply a `register` on an already-known id: update title/collab/cap,
    /// mark connected, and clear the buffer so the wrapper's upcoming replay
    /// is authoritative.
    pub fn resume(&self, title: Option<String>, cap: i64, collab: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            if title.is_some() {
                inner.title = title;
            }
            inner.collab = collab;
            inner.connected = true;
        }
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.set_cap(cap);
            buffer.clear();
        }
    }

    pub fn line_count(&self) -> u64 {
        if let Ok(buffer) = self.buffer.lock() {
            buffer.total_seq()
        } else {
            0
        }
    }
}

pub fn short_id_of(id: &str) -> String {
    id.chars().take(8).collect()
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("short_id", &self.short_id())
            .field("title", &self.title())
            .field("connected", &self.connected())
            .field("collab", &self.collab())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_is_first_eight_hex_chars() {
        assert_eq!(short_id_of("0123456789abcdef"), "01234567");
    }

    #[test]
    fn new_session_starts_connected() {
        let s = Session::new("abc".into(), Some("t".into()), 10, false);
        assert!(s.connected());
        assert!(!s.collab());
        assert_eq!(s.last_command(), None);
    }

    #[test]
    fn resume_clears_buffer_and_marks_connected() {
        let s = Session::new("abc".into(), None, 10, false);
        s.buffer.lock().unwrap().append("line".into());
        s.detach_conn();
        assert!(!s.connected());

        s.resume(Some("renamed".into()), 10, true);
        assert!(s.connected());
        assert!(s.collab());
        assert_eq!(s.title().as_deref(), Some("renamed"));
        assert_eq!(s.buffer.lock().unwrap().total_seq(), 0);
    }

    #[test]
    fn resume_applies_new_cap() {
        let s = Session::new("abc".into(), None, 10, false);
        s.resume(None, 3, false);
        s.buffer.lock().unwrap().append("a".into());
        s.buffer.lock().unwrap().append("b".into());
        s.buffer.lock().unwrap().append("c".into());
        s.buffer.lock().unwrap().append("d".into());
        assert_eq!(s.buffer.lock().unwrap().count(), 3);
    }
}
