pub mod error;
pub mod memory;
pub mod remote;
pub mod subscription;

use async_trait::async_trait;

use parley_types::{Message, NewMessage, Session, SessionEvent};

pub use error::BackendError;
pub use memory::InMemoryBackend;
pub use remote::{RemoteBackend, RemoteConfig};
pub use subscription::{Listeners, Subscription};

/// Table holding chat messages.
pub const MESSAGES_TABLE: &str = "messages";

/// The managed service behind the chat: hosted auth, message storage and the
/// insert change feed.
///
/// Subscriptions are plain handles. Events arrive exactly once, in send
/// order, until the handle is released with `unsubscribe` or dropped.
#[async_trait]
pub trait Backend: Send + Sync {
    /// The session the backend currently holds, if any.
    async fn current_session(&self) -> Result<Option<Session>, BackendError>;

    /// Stream of sign-in, sign-out and token-refresh events.
    fn on_session_change(&self) -> Subscription<SessionEvent>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError>;

    /// `None` when the account was created but still awaits confirmation.
    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;

    /// Every stored message, ascending by `created_at`.
    async fn query_messages(&self) -> Result<Vec<Message>, BackendError>;

    /// Rows inserted into the messages table from now on.
    fn subscribe_inserts(&self) -> Subscription<Message>;

    async fn insert_message(&self, row: NewMessage) -> Result<(), BackendError>;
}
