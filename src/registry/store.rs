//! Client registry implementation
//!
//! The central map from consumer identity to outbound buffer. It is the only
//! state shared between the ingestion and delivery sides.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::buffer::{OutboundBuffer, PushOutcome, ReaderGuard};
use super::config::{RegistryConfig, MIN_CLEANUP_INTERVAL};
use super::sentence::{ClientId, Sentence};

/// Outcome of fanning one sentence out to every buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Buffers the sentence was pushed into
    pub recipients: usize,
    /// Buffers that had to drop their oldest sentence
    pub dropped: usize,
}

/// Registry of all known consumers
///
/// Thread-safe via `RwLock`. Fan-out only needs the read lock, so ingestion
/// never waits on another fan-out; creating an entry takes the write lock,
/// which makes check-then-create atomic.
pub struct ClientRegistry {
    /// Map of client identity to its buffer
    clients: RwLock<HashMap<ClientId, Arc<OutboundBuffer>>>,

    /// Configuration
    config: RegistryConfig,
}

impl ClientRegistry {
    /// Create a new registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn new_buffer(&self, id: ClientId) -> Arc<OutboundBuffer> {
        tracing::info!(
            client = %id,
            capacity = self.config.buffer_capacity,
            "Client registered"
        );
        Arc::new(OutboundBuffer::new(self.config.buffer_capacity))
    }

    /// Get the buffer for `id`, creating it if this is the first time the
    /// identity is seen
    pub async fn ensure(&self, id: ClientId) -> Arc<OutboundBuffer> {
        if let Some(buffer) = self.clients.read().await.get(&id) {
            return Arc::clone(buffer);
        }

        let mut clients = self.clients.write().await;
        // Another task may have inserted between dropping the read lock and
        // acquiring the write lock
        Arc::clone(clients.entry(id).or_insert_with(|| self.new_buffer(id)))
    }

    /// Get the buffer for `id` and attach a reader to it
    ///
    /// Unlike `ensure` followed by `attach`, this cannot race with eviction:
    /// the reader is registered while the registry lock is still held.
    pub async fn attach(&self, id: ClientId) -> ReaderGuard {
        {
            let clients = self.clients.read().await;
            if let Some(buffer) = clients.get(&id) {
                return buffer.attach();
            }
        }

        let mut clients = self.clients.write().await;
        clients
            .entry(id)
            .or_insert_with(|| self.new_buffer(id))
            .attach()
    }

    /// Get the buffer for `id` without creating one
    pub async fn get(&self, id: &ClientId) -> Option<Arc<OutboundBuffer>> {
        self.clients.read().await.get(id).cloned()
    }

    /// Apply `f` to every registered buffer
    ///
    /// Holds the read lock for the whole pass. Entries registered while the
    /// pass is waiting for the lock may or may not be visited.
    pub async fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&ClientId, &Arc<OutboundBuffer>),
    {
        let clients = self.clients.read().await;
        for (id, buffer) in clients.iter() {
            f(id, buffer);
        }
    }

    /// Push a sentence into every registered buffer
    pub async fn broadcast(&self, sentence: &Sentence) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        self.for_each(|id, buffer| {
            report.recipients += 1;
            if buffer.push(sentence.clone()) == PushOutcome::DroppedOldest {
                report.dropped += 1;
                tracing::trace!(client = %id, "Buffer full, dropped oldest sentence");
            }
        })
        .await;

        report
    }

    /// Identities of all registered clients
    pub async fn client_ids(&self) -> Vec<ClientId> {
        self.clients.read().await.keys().copied().collect()
    }

    /// Number of registered clients
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Whether no client has been registered
    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    /// Run eviction once
    ///
    /// Removes entries that have no attached reader and have been idle longer
    /// than `idle_eviction`. Does nothing when eviction is disabled. Returns
    /// the number of entries removed.
    pub async fn cleanup(&self) -> usize {
        let Some(timeout) = self.config.idle_eviction else {
            return 0;
        };

        let mut clients = self.clients.write().await;
        let before = clients.len();

        clients.retain(|id, buffer| {
            let keep = buffer.reader_count() > 0 || buffer.idle_for() <= timeout;
            if !keep {
                tracing::info!(
                    client = %id,
                    buffered = buffer.len(),
                    "Client evicted after inactivity"
                );
            }
            keep
        });

        before - clients.len()
    }

    /// Spawn background eviction task
    ///
    /// Returns `None` when eviction is disabled, otherwise a handle that can
    /// be used to abort the task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        self.config.idle_eviction?;

        let registry = Arc::clone(self);
        let interval = registry.config.cleanup_interval.max(MIN_CLEANUP_INTERVAL);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.cleanup().await;
            }
        }))
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
