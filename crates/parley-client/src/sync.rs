use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use parley_backend::{Backend, BackendError, Subscription};
use parley_types::{Message, NewMessage};

/// Something the synchronizer has to fold into the list.
#[derive(Debug)]
pub enum SyncEvent {
    Inserted(Message),
    Loaded {
        generation: u64,
        result: Result<Vec<Message>, BackendError>,
    },
}

/// Keeps the in-memory message list in step with the backend: one bulk read
/// per session, then appends from the insert feed.
///
/// Arrival order is trusted. Nothing is re-sorted or deduplicated, and a row
/// inserted while the bulk read is in flight is overwritten by its result.
pub struct MessageSynchronizer {
    messages: Vec<Message>,
    inserts: Option<Subscription<Message>>,
    /// Bumped on every start/stop so late bulk reads can be told apart.
    generation: u64,
    loaded_tx: mpsc::UnboundedSender<SyncEvent>,
    loaded_rx: mpsc::UnboundedReceiver<SyncEvent>,
}

impl Default for MessageSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageSynchronizer {
    pub fn new() -> Self {
        let (loaded_tx, loaded_rx) = mpsc::unbounded_channel();
        Self {
            messages: Vec::new(),
            inserts: None,
            generation: 0,
            loaded_tx,
            loaded_rx,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_running(&self) -> bool {
        self.inserts.is_some()
    }

    /// Open the insert feed and, alongside it, start the bulk read.
    pub fn start(&mut self, backend: Arc<dyn Backend>) {
        self.release();
        self.generation += 1;
        self.inserts = Some(backend.subscribe_inserts());

        let generation = self.generation;
        let tx = self.loaded_tx.clone();
        tokio::spawn(async move {
            let result = backend.query_messages().await;
            let _ = tx.send(SyncEvent::Loaded { generation, result });
        });
        debug!("Message sync started (generation {})", generation);
    }

    /// Close the feed and drop the list from view. Stored rows are untouched.
    pub fn stop(&mut self) {
        self.release();
        self.generation += 1;
        self.messages.clear();
    }

    /// Next insert or bulk-read completion.
    pub async fn recv(&mut self) -> SyncEvent {
        let inserts = &mut self.inserts;
        let loaded = &mut self.loaded_rx;
        tokio::select! {
            Some(event) = loaded.recv() => event,
            Some(message) = recv_insert(inserts) => SyncEvent::Inserted(message),
        }
    }

    pub fn apply(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Inserted(message) => self.append(message),
            SyncEvent::Loaded { generation, result } => {
                if generation != self.generation || !self.is_running() {
                    debug!("Dropping stale bulk read (generation {})", generation);
                    return;
                }
                match result {
                    Ok(messages) => {
                        info!("Loaded {} messages", messages.len());
                        self.replace(messages);
                    }
                    Err(e) => error!("Failed to load messages: {}", e),
                }
            }
        }
    }

    /// Insert events always land at the end.
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn replace(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    fn release(&mut self) {
        if let Some(inserts) = self.inserts.take() {
            inserts.unsubscribe();
        }
    }
}

async fn recv_insert(inserts: &mut Option<Subscription<Message>>) -> Option<Message> {
    match inserts.as_mut() {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

/// Fire one insert and log if it fails. No echo, no retry.
pub fn send(backend: Arc<dyn Backend>, row: NewMessage) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = backend.insert_message(row).await {
            error!("Failed to send message: {}", e);
        }
    })
}
