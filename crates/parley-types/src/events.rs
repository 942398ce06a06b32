use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Message, Session};

/// What happened to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

/// Pushed on the session-change stream. `session` is the full replacement
/// value: `None` after sign-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    pub session: Option<Session>,
}

impl SessionEvent {
    pub fn signed_in(session: Session) -> Self {
        Self {
            kind: SessionEventKind::SignedIn,
            session: Some(session),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            kind: SessionEventKind::SignedOut,
            session: None,
        }
    }

    pub fn token_refreshed(session: Session) -> Self {
        Self {
            kind: SessionEventKind::TokenRefreshed,
            session: Some(session),
        }
    }
}

// -- Realtime change feed (Phoenix channel frames) --

pub const PHX_JOIN: &str = "phx_join";
pub const PHX_LEAVE: &str = "phx_leave";
pub const PHX_REPLY: &str = "phx_reply";
pub const PHX_ERROR: &str = "phx_error";
pub const PHX_CLOSE: &str = "phx_close";
pub const HEARTBEAT: &str = "heartbeat";
pub const ACCESS_TOKEN: &str = "access_token";
pub const POSTGRES_CHANGES: &str = "postgres_changes";

/// One frame on the realtime socket, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixFrame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl PhoenixFrame {
    pub fn new(topic: impl Into<String>, event: &str, payload: Value, reference: u64) -> Self {
        Self {
            topic: topic.into(),
            event: event.to_string(),
            payload,
            reference: Some(reference.to_string()),
        }
    }

    pub fn heartbeat(reference: u64) -> Self {
        Self::new("phoenix", HEARTBEAT, Value::Object(Default::default()), reference)
    }

    /// Join a table's INSERT feed on `realtime:{schema}:{table}`.
    pub fn join_inserts(schema: &str, table: &str, access_token: &str, reference: u64) -> Self {
        let payload = serde_json::json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [
                    { "event": "INSERT", "schema": schema, "table": table }
                ]
            },
            "access_token": access_token,
        });
        Self::new(format!("realtime:{}:{}", schema, table), PHX_JOIN, payload, reference)
    }

    /// Hand a joined channel a fresh token so the server keeps it open.
    pub fn access_token(topic: &str, access_token: &str, reference: u64) -> Self {
        let payload = serde_json::json!({ "access_token": access_token });
        Self::new(topic, ACCESS_TOKEN, payload, reference)
    }

    pub fn leave(topic: &str, reference: u64) -> Self {
        Self::new(topic, PHX_LEAVE, Value::Object(Default::default()), reference)
    }

    /// The inserted row if this frame is a `postgres_changes` INSERT push.
    pub fn inserted_record(&self) -> Option<Result<Message, serde_json::Error>> {
        if self.event != POSTGRES_CHANGES {
            return None;
        }
        let change: ChangePayload = match serde_json::from_value(self.payload.clone()) {
            Ok(change) => change,
            Err(e) => return Some(Err(e)),
        };
        if change.data.kind != "INSERT" {
            return None;
        }
        Some(serde_json::from_value(change.data.record))
    }

    /// `status` of a `phx_reply`, e.g. "ok" or "error".
    pub fn reply_status(&self) -> Option<&str> {
        if self.event != PHX_REPLY {
            return None;
        }
        self.payload.get("status").and_then(Value::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct ChangePayload {
    data: ChangeData,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    record: Value,
}
