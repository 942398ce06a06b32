//! Adapter for a Supabase-compatible service: GoTrue auth, PostgREST rows
//! and the Phoenix realtime change feed.

mod auth;
mod realtime;
mod rest;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use parley_types::{Message, NewMessage, Session, SessionEvent};

use crate::subscription::{Listeners, Subscription};
use crate::{Backend, BackendError};

/// Refresh this long before the access token expires.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Connection credentials for the hosted backend.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    base_url: Url,
    anon_key: String,
}

impl RemoteConfig {
    pub fn new(url: &str, anon_key: impl Into<String>) -> Result<Self, BackendError> {
        let mut base_url = Url::parse(url)?;
        // `Url::join` drops the last path segment unless the base ends in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            base_url,
            anon_key: anon_key.into(),
        })
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        Ok(self.base_url.join(path)?)
    }

    /// `ws(s)://…/realtime/v1/websocket?apikey=…&vsn=1.0.0`
    pub fn realtime_url(&self) -> Result<Url, BackendError> {
        let http = self.endpoint("realtime/v1/websocket")?;
        let ws = http
            .as_str()
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        let mut url = Url::parse(&ws)?;
        url.query_pairs_mut()
            .append_pair("apikey", &self.anon_key)
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }
}

/// Backend client talking to the hosted service over HTTPS and WebSocket.
///
/// Holds the session in memory only; a new process starts signed out.
pub struct RemoteBackend {
    inner: Arc<Inner>,
}

struct Inner {
    config: RemoteConfig,
    http: reqwest::Client,
    session: Mutex<Option<Session>>,
    session_listeners: Listeners<SessionEvent>,
    refresh_task: Mutex<Option<CancellationToken>>,
    /// Current bearer, watched by open change feeds.
    tokens: watch::Sender<String>,
    feeds: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl RemoteBackend {
    pub fn new(config: RemoteConfig) -> Self {
        let (tokens, _) = watch::channel(config.anon_key.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                http: reqwest::Client::new(),
                session: Mutex::new(None),
                session_listeners: Listeners::new(),
                refresh_task: Mutex::new(None),
                tokens,
                feeds: Mutex::new(Vec::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Stop background work and wait for open change feeds to leave their
    /// channels. Call before the runtime goes away.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        let feeds = std::mem::take(
            &mut *self.inner.feeds.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for feed in feeds {
            if let Err(e) = feed.await {
                warn!("Realtime feed task failed: {}", e);
            }
        }
    }
}

impl Drop for RemoteBackend {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl Inner {
    fn session(&self) -> Option<Session> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Access token when signed in, anon key otherwise.
    fn bearer(&self) -> String {
        self.session()
            .map(|s| s.access_token)
            .unwrap_or_else(|| self.config.anon_key.clone())
    }

    /// Replace the stored session, announce it, and (re)arm the refresh timer.
    fn replace_session(self: &Arc<Self>, event: SessionEvent) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = event.session.clone();

        let previous = self
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = previous {
            token.cancel();
        }
        if let Some(session) = &event.session {
            self.schedule_refresh(session);
        }

        let bearer = self.bearer();
        self.tokens.send_if_modified(|current| {
            if *current == bearer {
                return false;
            }
            *current = bearer;
            true
        });

        self.session_listeners.broadcast(event);
    }

    fn schedule_refresh(self: &Arc<Self>, session: &Session) {
        let (Some(expires_at), Some(refresh_token)) =
            (session.expires_at, session.refresh_token.clone())
        else {
            return;
        };

        let cancel = self.shutdown.child_token();
        *self
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(cancel.clone());

        let delay = (expires_at - Utc::now())
            .to_std()
            .unwrap_or_default()
            .saturating_sub(REFRESH_MARGIN);

        let inner = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            match inner.refresh_grant(&refresh_token).await {
                Ok(fresh) => {
                    if cancel.is_cancelled() {
                        return;
                    }
                    info!("Access token refreshed for {}", fresh.user_id());
                    inner.replace_session(SessionEvent::token_refreshed(fresh));
                }
                Err(e) => {
                    if cancel.is_cancelled() {
                        return;
                    }
                    warn!("Token refresh failed, signing out: {}", e);
                    inner.replace_session(SessionEvent::signed_out());
                }
            }
        });
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    async fn current_session(&self) -> Result<Option<Session>, BackendError> {
        Ok(self.inner.session())
    }

    fn on_session_change(&self) -> Subscription<SessionEvent> {
        self.inner.session_listeners.subscribe()
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let session = self.inner.password_grant(email, password).await?;
        info!("Signed in as {}", session.user_id());
        self.inner
            .replace_session(SessionEvent::signed_in(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>, BackendError> {
        let session = self.inner.sign_up(email, password).await?;
        match &session {
            Some(session) => {
                info!("Signed up and signed in as {}", session.user_id());
                self.inner
                    .replace_session(SessionEvent::signed_in(session.clone()));
            }
            None => info!("Sign-up for {} awaits email confirmation", email),
        }
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        let result = match self.inner.session() {
            Some(session) => self.inner.logout(&session.access_token).await,
            None => Ok(()),
        };
        // The local session goes regardless of what the server said.
        self.inner.replace_session(SessionEvent::signed_out());
        result
    }

    async fn query_messages(&self) -> Result<Vec<Message>, BackendError> {
        self.inner.select_messages().await
    }

    fn subscribe_inserts(&self) -> Subscription<Message> {
        let url = match self.inner.config.realtime_url() {
            Ok(url) => url,
            Err(e) => {
                warn!("Cannot build realtime url: {}", e);
                return Subscription::closed();
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = self.inner.shutdown.child_token();
        let feed = tokio::spawn(realtime::run_insert_feed(
            url,
            self.inner.tokens.subscribe(),
            tx,
            cancel.clone(),
        ));
        {
            let mut feeds = self.inner.feeds.lock().unwrap_or_else(PoisonError::into_inner);
            feeds.retain(|f| !f.is_finished());
            feeds.push(feed);
        }

        Subscription::new(rx, move || cancel.cancel())
    }

    async fn insert_message(&self, row: NewMessage) -> Result<(), BackendError> {
        self.inner.insert_messages(&[row]).await
    }
}
