use tracing::{debug, warn};

use parley_backend::{Backend, Subscription};
use parley_types::{Session, SessionEvent};

/// How a session replacement moved the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransition {
    /// none → some
    Started,
    /// some → none
    Ended,
    /// some → some (refresh, or a different account)
    Replaced,
    /// none → none
    Unchanged,
}

/// Tracks the signed-in identity and the derived display name.
pub struct SessionManager {
    session: Option<Session>,
    username: String,
    events: Option<Subscription<SessionEvent>>,
}

impl SessionManager {
    /// Subscribe to session changes, then read the current session once.
    /// A failed read counts as signed out.
    pub async fn mount(backend: &dyn Backend) -> Self {
        let events = backend.on_session_change();

        let session = match backend.current_session().await {
            Ok(session) => session,
            Err(e) => {
                warn!("Could not read current session: {}", e);
                None
            }
        };

        let mut manager = Self {
            session: None,
            username: String::new(),
            events: Some(events),
        };
        manager.replace(session);
        manager
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Next event from the backend, pending forever once released.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        match self.events.as_mut() {
            Some(events) => events.recv().await,
            None => std::future::pending().await,
        }
    }

    pub fn apply(&mut self, event: SessionEvent) -> SessionTransition {
        debug!("Session event {:?}", event.kind);
        self.replace(event.session)
    }

    /// Swap in `session` wholesale and re-derive the username.
    pub fn replace(&mut self, session: Option<Session>) -> SessionTransition {
        let had_session = self.session.is_some();
        self.username = session.as_ref().map(Session::username).unwrap_or_default();
        self.session = session;

        match (had_session, self.session.is_some()) {
            (false, true) => SessionTransition::Started,
            (true, false) => SessionTransition::Ended,
            (true, true) => SessionTransition::Replaced,
            (false, false) => SessionTransition::Unchanged,
        }
    }

    /// Release the session-change subscription.
    pub fn unmount(&mut self) {
        if let Some(events) = self.events.take() {
            events.unsubscribe();
        }
    }
}
