use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use parley_backend::Backend;
use parley_types::{Message, NewMessage, Session, SessionEvent};

use crate::composer::Composer;
use crate::session::{SessionManager, SessionTransition};
use crate::sync::{self, MessageSynchronizer, SyncEvent};

/// Everything the controller reacts to besides direct user intents.
#[derive(Debug)]
pub enum ChatEvent {
    Session(SessionEvent),
    Sync(SyncEvent),
    /// Result line for the authentication form.
    AuthStatus(String),
}

/// Read-only view of the controller state.
#[derive(Debug, Clone, Copy)]
pub struct ChatSnapshot<'a> {
    pub session: Option<&'a Session>,
    pub username: &'a str,
    pub messages: &'a [Message],
    pub draft: &'a str,
    pub auth_status: Option<&'a str>,
}

/// Owns the session, the message list and the draft. All mutation goes
/// through `apply` and the intent methods; the view only sees snapshots.
pub struct ChatController {
    backend: Arc<dyn Backend>,
    session: SessionManager,
    sync: MessageSynchronizer,
    composer: Composer,
    auth_status: Option<String>,
    status_tx: mpsc::UnboundedSender<String>,
    status_rx: mpsc::UnboundedReceiver<String>,
}

impl ChatController {
    /// Read the session, subscribe to its changes, and start syncing if
    /// someone is already signed in.
    pub async fn mount(backend: Arc<dyn Backend>) -> Self {
        let session = SessionManager::mount(backend.as_ref()).await;
        let (status_tx, status_rx) = mpsc::unbounded_channel();

        let mut controller = Self {
            backend,
            session,
            sync: MessageSynchronizer::new(),
            composer: Composer::new(),
            auth_status: None,
            status_tx,
            status_rx,
        };
        if controller.session.session().is_some() {
            controller.sync.start(controller.backend.clone());
        }
        controller
    }

    pub fn snapshot(&self) -> ChatSnapshot<'_> {
        ChatSnapshot {
            session: self.session.session(),
            username: self.session.username(),
            messages: self.sync.messages(),
            draft: self.composer.draft(),
            auth_status: self.auth_status.as_deref(),
        }
    }

    /// Wait for the next session event, insert, bulk-read result or auth
    /// status. Cancel-safe.
    pub async fn next_event(&mut self) -> ChatEvent {
        let session = &mut self.session;
        let sync = &mut self.sync;
        let status = &mut self.status_rx;
        tokio::select! {
            Some(event) = session.recv() => ChatEvent::Session(event),
            event = sync.recv() => ChatEvent::Sync(event),
            Some(line) = status.recv() => ChatEvent::AuthStatus(line),
        }
    }

    pub fn apply(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::Session(event) => match self.session.apply(event) {
                SessionTransition::Started => {
                    self.auth_status = None;
                    self.sync.start(self.backend.clone());
                }
                SessionTransition::Ended => self.sync.stop(),
                SessionTransition::Replaced | SessionTransition::Unchanged => {}
            },
            ChatEvent::Sync(event) => self.sync.apply(event),
            ChatEvent::AuthStatus(line) => self.auth_status = Some(line),
        }
    }

    /// `next_event` then `apply`.
    pub async fn step(&mut self) {
        let event = self.next_event().await;
        self.apply(event);
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.composer.set_draft(text);
    }

    /// Send the draft if it has content. The draft is cleared right away;
    /// the send itself runs in the background.
    pub fn submit(&mut self) -> Option<JoinHandle<()>> {
        let content = self.composer.take_submission()?;
        let Some(session) = self.session.session() else {
            debug!("Submit without a session, dropping draft");
            return None;
        };

        let row = NewMessage {
            content,
            user_id: session.user_id().to_string(),
            username: self.session.username().to_string(),
        };
        Some(sync::send(self.backend.clone(), row))
    }

    /// Sign out through the backend. The resulting session event resets the view.
    pub fn logout(&self) -> JoinHandle<()> {
        let backend = self.backend.clone();
        tokio::spawn(async move {
            if let Err(e) = backend.sign_out().await {
                error!("Sign-out failed: {}", e);
            }
        })
    }

    pub fn sign_in(&self, email: &str, password: &str) -> JoinHandle<()> {
        let backend = self.backend.clone();
        let status = self.status_tx.clone();
        let (email, password) = (email.to_string(), password.to_string());
        tokio::spawn(async move {
            if let Err(e) = backend.sign_in(&email, &password).await {
                warn!("Sign-in failed for {}: {}", email, e);
                let _ = status.send(format!("Sign-in failed: {}", e));
            }
        })
    }

    pub fn sign_up(&self, email: &str, password: &str) -> JoinHandle<()> {
        let backend = self.backend.clone();
        let status = self.status_tx.clone();
        let (email, password) = (email.to_string(), password.to_string());
        tokio::spawn(async move {
            match backend.sign_up(&email, &password).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    info!("Account {} awaits confirmation", email);
                    let _ = status.send("Check your email to confirm the account.".to_string());
                }
                Err(e) => {
                    warn!("Sign-up failed for {}: {}", email, e);
                    let _ = status.send(format!("Sign-up failed: {}", e));
                }
            }
        })
    }

    /// Release both subscriptions. Also happens on drop.
    pub fn unmount(mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.sync.stop();
        self.session.unmount();
    }
}

impl Drop for ChatController {
    fn drop(&mut self) {
        self.release();
    }
}
