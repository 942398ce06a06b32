use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The authenticated account as reported by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Identity issued by the auth service. Replaced wholesale on refresh.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub user: User,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    /// Display name: the local part of the account email, or empty if the
    /// account has no email. Not unique across accounts.
    pub fn username(&self) -> String {
        self.user
            .email
            .as_deref()
            .map(username_from_email)
            .unwrap_or_default()
            .to_string()
    }
}

// Tokens stay out of logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Text before the first '@'. An address without '@' is returned whole.
pub fn username_from_email(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}

/// A stored chat message. `id` and `created_at` are assigned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub user_id: String,
}

/// Row sent on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub content: String,
    pub user_id: String,
    pub username: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(email: Option<&str>) -> Session {
        Session {
            access_token: "secret-token".into(),
            refresh_token: None,
            expires_at: None,
            user: User {
                id: "u1".into(),
                email: email.map(str::to_string),
            },
        }
    }

    #[test]
    fn username_is_email_local_part() {
        assert_eq!(session(Some("alice@x.com")).username(), "alice");
        assert_eq!(username_from_email("bob"), "bob");
        assert_eq!(username_from_email("@x.com"), "");
    }

    #[test]
    fn session_without_email_has_empty_username() {
        assert_eq!(session(None).username(), "");
    }

    #[test]
    fn debug_hides_tokens() {
        let out = format!("{:?}", session(Some("alice@x.com")));
        assert!(out.contains("alice@x.com"));
        assert!(!out.contains("secret-token"));
    }

    #[test]
    fn message_parses_backend_timestamp() {
        let json = r#"{
            "id": "m1",
            "content": "hi",
            "username": "alice",
            "created_at": "2024-05-01T10:00:00.123456+00:00",
            "user_id": "u1"
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, "m1");
        assert_eq!(msg.created_at.timestamp(), 1_714_557_600);
    }
}
