use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use parley_types::{Message, NewMessage, Session, SessionEvent, User};

use crate::subscription::{Listeners, Subscription};
use crate::{Backend, BackendError};

struct Account {
    user: User,
    password: String,
}

/// In-process backend with the same contract as the hosted one: the server
/// side assigns ids and timestamps and fans inserts out to subscribers.
///
/// Failure switches let callers exercise the error paths.
pub struct InMemoryBackend {
    accounts: Mutex<HashMap<String, Account>>,
    session: Mutex<Option<Session>>,
    messages: Mutex<Vec<Message>>,
    last_created_at: Mutex<Option<DateTime<Utc>>>,
    session_listeners: Listeners<SessionEvent>,
    insert_listeners: Listeners<Message>,
    fail_session: AtomicBool,
    fail_query: AtomicBool,
    fail_insert: AtomicBool,
    confirm_email: AtomicBool,
    query_calls: AtomicUsize,
    insert_calls: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            session: Mutex::new(None),
            messages: Mutex::new(Vec::new()),
            last_created_at: Mutex::new(None),
            session_listeners: Listeners::new(),
            insert_listeners: Listeners::new(),
            fail_session: AtomicBool::new(false),
            fail_query: AtomicBool::new(false),
            fail_insert: AtomicBool::new(false),
            confirm_email: AtomicBool::new(false),
            query_calls: AtomicUsize::new(0),
            insert_calls: AtomicUsize::new(0),
        }
    }

    /// Register an account with a fixed user id.
    pub fn with_account(self, user_id: &str, email: &str, password: &str) -> Self {
        lock(&self.accounts).insert(
            email.to_string(),
            Account {
                user: User {
                    id: user_id.to_string(),
                    email: Some(email.to_string()),
                },
                password: password.to_string(),
            },
        );
        self
    }

    /// New accounts wait for email confirmation: sign-up yields no session.
    pub fn with_email_confirmation(self) -> Self {
        self.confirm_email.store(true, Ordering::Relaxed);
        self
    }

    /// Start out signed in as an already registered account.
    pub fn with_session(self, email: &str) -> Self {
        let session = lock(&self.accounts)
            .get(email)
            .map(|account| issue_session(account.user.clone()));
        *lock(&self.session) = session;
        self
    }

    /// Seed stored history. The row is kept exactly as given.
    pub fn with_message(self, message: Message) -> Self {
        {
            let mut last = lock(&self.last_created_at);
            if last.is_none_or(|t| t < message.created_at) {
                *last = Some(message.created_at);
            }
        }
        let mut messages = lock(&self.messages);
        messages.push(message);
        messages.sort_by_key(|m| m.created_at);
        drop(messages);
        self
    }

    /// Store and broadcast a row as if another client had inserted it.
    pub fn insert_as(&self, row: NewMessage) -> Message {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            content: row.content,
            username: row.username,
            created_at: self.next_created_at(),
            user_id: row.user_id,
        };
        lock(&self.messages).push(message.clone());
        self.insert_listeners.broadcast(message.clone());
        message
    }

    /// Push a change-feed event without storing it.
    pub fn push_insert_event(&self, message: Message) {
        self.insert_listeners.broadcast(message);
    }

    /// Rotate the current session's tokens and announce the refresh.
    pub fn refresh_session(&self) -> Option<Session> {
        let refreshed = {
            let mut session = lock(&self.session);
            let user = session.as_ref()?.user.clone();
            let fresh = issue_session(user);
            *session = Some(fresh.clone());
            fresh
        };
        self.session_listeners
            .broadcast(SessionEvent::token_refreshed(refreshed.clone()));
        Some(refreshed)
    }

    pub fn set_fail_session(&self, fail: bool) {
        self.fail_session.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_query(&self, fail: bool) {
        self.fail_query.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_insert(&self, fail: bool) {
        self.fail_insert.store(fail, Ordering::Relaxed);
    }

    pub fn stored_messages(&self) -> Vec<Message> {
        lock(&self.messages).clone()
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::Relaxed)
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::Relaxed)
    }

    pub fn session_listener_count(&self) -> usize {
        self.session_listeners.len()
    }

    pub fn insert_listener_count(&self) -> usize {
        self.insert_listeners.len()
    }

    fn next_created_at(&self) -> DateTime<Utc> {
        let mut last = lock(&self.last_created_at);
        let now = Utc::now();
        let next = match *last {
            Some(prev) if prev >= now => prev + Duration::microseconds(1),
            _ => now,
        };
        *last = Some(next);
        next
    }
}

fn issue_session(user: User) -> Session {
    Session {
        access_token: Uuid::new_v4().to_string(),
        refresh_token: Some(Uuid::new_v4().to_string()),
        expires_at: Some(Utc::now() + Duration::hours(1)),
        user,
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn current_session(&self) -> Result<Option<Session>, BackendError> {
        if self.fail_session.load(Ordering::Relaxed) {
            return Err(BackendError::Unavailable("session lookup failed".into()));
        }
        Ok(lock(&self.session).clone())
    }

    fn on_session_change(&self) -> Subscription<SessionEvent> {
        self.session_listeners.subscribe()
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let session = {
            let accounts = lock(&self.accounts);
            let account = accounts
                .get(email)
                .filter(|a| a.password == password)
                .ok_or(BackendError::InvalidCredentials)?;
            issue_session(account.user.clone())
        };

        *lock(&self.session) = Some(session.clone());
        debug!("{} signed in", email);
        self.session_listeners
            .broadcast(SessionEvent::signed_in(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>, BackendError> {
        let user = {
            let mut accounts = lock(&self.accounts);
            if accounts.contains_key(email) {
                return Err(BackendError::AccountExists);
            }
            let user = User {
                id: Uuid::new_v4().to_string(),
                email: Some(email.to_string()),
            };
            accounts.insert(
                email.to_string(),
                Account {
                    user: user.clone(),
                    password: password.to_string(),
                },
            );
            user
        };

        if self.confirm_email.load(Ordering::Relaxed) {
            debug!("{} registered, confirmation pending", email);
            return Ok(None);
        }

        let session = issue_session(user);
        *lock(&self.session) = Some(session.clone());
        self.session_listeners
            .broadcast(SessionEvent::signed_in(session.clone()));
        Ok(Some(session))
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        lock(&self.session).take();
        self.session_listeners.broadcast(SessionEvent::signed_out());
        Ok(())
    }

    async fn query_messages(&self) -> Result<Vec<Message>, BackendError> {
        self.query_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_query.load(Ordering::Relaxed) {
            return Err(BackendError::Unavailable("query failed".into()));
        }
        let mut rows = lock(&self.messages).clone();
        rows.sort_by_key(|m| m.created_at);
        Ok(rows)
    }

    fn subscribe_inserts(&self) -> Subscription<Message> {
        self.insert_listeners.subscribe()
    }

    async fn insert_message(&self, row: NewMessage) -> Result<(), BackendError> {
        self.insert_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_insert.load(Ordering::Relaxed) {
            return Err(BackendError::Unavailable("insert failed".into()));
        }
        let owner = lock(&self.session).as_ref().map(|s| s.user.id.clone());
        match owner {
            Some(id) if id == row.user_id => {
                self.insert_as(row);
                Ok(())
            }
            Some(_) => Err(BackendError::Status {
                status: 403,
                message: "row owner does not match session".into(),
            }),
            None => Err(BackendError::NoSession),
        }
    }
}
