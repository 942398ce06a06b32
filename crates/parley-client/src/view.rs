//! Screen model derived from a controller snapshot. No state of its own:
//! the same snapshot and clock always give the same screen.

use chrono::{DateTime, Utc};

use crate::controller::ChatSnapshot;
use crate::humanize::format_distance;

pub const TITLE: &str = "Chat Room";
pub const LOGOUT_LABEL: &str = "Log out";
pub const SEND_LABEL: &str = "Send";
pub const PLACEHOLDER: &str = "Type a message...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    SignIn(AuthForm),
    Chat(ChatView),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthForm {
    pub title: &'static str,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatView {
    pub title: &'static str,
    pub greeting: String,
    pub logout_label: &'static str,
    pub rows: Vec<MessageRow>,
    pub composer: ComposerView,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub id: String,
    pub username: String,
    pub content: String,
    pub age: String,
    pub align: Align,
    /// Authored by the signed-in user; drawn with the highlight colour.
    pub own: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposerView {
    pub draft: String,
    pub placeholder: &'static str,
    pub send_label: &'static str,
    pub can_submit: bool,
}

pub fn render(snapshot: &ChatSnapshot<'_>, now: DateTime<Utc>) -> Screen {
    let Some(session) = snapshot.session else {
        return Screen::SignIn(AuthForm {
            title: "Sign in",
            status: snapshot.auth_status.map(str::to_string),
        });
    };

    let rows = snapshot
        .messages
        .iter()
        .map(|message| {
            let own = message.user_id == session.user_id();
            MessageRow {
                id: message.id.clone(),
                username: message.username.clone(),
                content: message.content.clone(),
                age: format_distance(message.created_at, now),
                align: if own { Align::Right } else { Align::Left },
                own,
            }
        })
        .collect();

    Screen::Chat(ChatView {
        title: TITLE,
        greeting: format!("Welcome, {}", snapshot.username),
        logout_label: LOGOUT_LABEL,
        rows,
        composer: ComposerView {
            draft: snapshot.draft.to_string(),
            placeholder: PLACEHOLDER,
            send_label: SEND_LABEL,
            can_submit: !snapshot.draft.trim().is_empty(),
        },
    })
}
