//! Wire protocol for the wrapper↔daemon and control-host↔daemon connections.
//!
//! An envelope is a single newline-delimited JSON object: `{"type": ...,
//! "session_id": ..., "payload": ...}`. Encoding a record MUST atomically
//! emit exactly one `\n`-terminated line; callers serialize through a single
//! lock per connection so two records never interleave on the wire.

use serde::{Deserialize, Serialize};

/// One newline-delimited record on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Envelope {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            session_id: None,
        }
    }

    pub fn with_session(message: Message, session_id: impl Into<String>) -> Self {
        Self {
            message,
            session_id: Some(session_id.into()),
        }
    }

    /// Encode as a single `\n`-terminated line.
    pub fn encode(&self) -> crate::Result<String> {
        let mut s = serde_json::to_string(self)
            .map_err(|e| crate::ScribeError::Protocol(e.to_string()))?;
        s.push('\n');
        Ok(s)
    }

    /// Decode a single line (without its trailing newline).
    pub fn decode(line: &str) -> crate::Result<Self> {
        serde_json::from_str(line).map_err(|e| crate::ScribeError::Protocol(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Message {
    /// W→D: register (or resume) a session.
    Register {
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        buffer_size: Option<usize>,
        #[serde(default)]
        collab: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    /// D→W: reply to `Register`.
    Ack { session_id: String, short_id: String },

    /// W→D: a batch of freshly produced lines.
    Output { lines: Vec<String> },

    /// W→D: replay of the local mirror after reconnecting.
    Replay {
        lines: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_command: Option<String>,
    },

    /// W→D: a detected command line.
    Command { command: String },

    /// D→W: input to write verbatim to the PTY master.
    Input { text: String },

    /// W→D: orderly disconnect notice.
    Disconnect,

    /// C→D: list all sessions.
    ListSessions,

    /// C→D: query a session's history.
    QuerySession {
        session: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        search: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_n: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cursor: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        count: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_results: Option<usize>,
    },

    /// C→D: deliver input to a collab session.
    WriteSession { session: String, text: String },

    /// D→*: typed acknowledgement payloads for control requests.
    AckSessions {
        sessions: Vec<SessionInfo>,
    },
    AckQuery {
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        total_lines: u64,
        lines: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        next_cursor: Option<u64>,
        has_more: bool,
    },
    AckWrite {
        success: bool,
        session_id: String,
        bytes_sent: usize,
    },

    /// D→*: an error occurred processing the previous request.
    Error { message: String },
}

/// Public summary of a session, as returned by `list_sessions`/`query_session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_command: Option<String>,
    pub line_count: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub connected: bool,
    pub collab: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_round_trips() {
        let env = Envelope::new(Message::Register {
            title: Some("build".into()),
            buffer_size: Some(5_000),
            collab: true,
            session_id: Some("abc123".into()),
        });
        let line = env.encode().unwrap();
        assert!(line.ends_with('\n'));
        let decoded = Envelope::decode(line.trim_end()).unwrap();
        match decoded.message {
            Message::Register {
                title,
                buffer_size,
                collab,
                session_id,
            } => {
                assert_eq!(title.as_deref(), Some("build"));
                assert_eq!(buffer_size, Some(5_000));
                assert!(collab);
                assert_eq!(session_id.as_deref(), Some("abc123"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn ack_has_session_ids() {
        let env = Envelope::new(Message::Ack {
            session_id: "full".into(),
            short_id: "short".into(),
        });
        let line = env.encode().unwrap();
        let decoded = Envelope::decode(line.trim_end()).unwrap();
        matches!(decoded.message, Message::Ack { .. });
    }

    #[test]
    fn unparseable_line_is_protocol_error() {
        assert!(Envelope::decode("not json").is_err());
    }

    #[test]
    fn envelope_carries_session_id_binding() {
        let env = Envelope::with_session(Message::Command { command: "ls".into() }, "sess-1");
        let line = env.encode().unwrap();
        let decoded = Envelope::decode(line.trim_end()).unwrap();
        assert_eq!(decoded.session_id.as_deref(), Some("sess-1"));
    }
}
