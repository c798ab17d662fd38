//! Relay lifecycle
//!
//! Owns the shared registry and drives both listeners through
//! `Starting -> Running -> Stopping -> Stopped`. Shutdown can be triggered
//! by anything: a signal, a test, another task holding a [`ShutdownHandle`].

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::registry::ClientRegistry;
use crate::server::config::RelayConfig;
use crate::server::delivery::DeliveryListener;
use crate::server::ingest::IngestListener;
use crate::server::Listener;
use crate::stats::RelayStats;

/// Lifecycle state of the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Listeners are being bound and launched
    Starting,
    /// Both listeners are serving
    Running,
    /// Listeners have been told to stop and are being joined
    Stopping,
    /// Nothing is running; `start` may be called
    Stopped,
}

/// Relay controller
///
/// The registry and stats outlive individual runs, so buffered sentences
/// survive a stop/start cycle.
pub struct Relay {
    config: RelayConfig,
    registry: Arc<ClientRegistry>,
    stats: Arc<RelayStats>,
    state: Arc<watch::Sender<RelayState>>,
}

impl Relay {
    /// Create a stopped relay
    pub fn new(config: RelayConfig) -> Self {
        let registry = Arc::new(ClientRegistry::with_config(config.registry.clone()));
        let (state, _) = watch::channel(RelayState::Stopped);
        let state = Arc::new(state);

        Self {
            config,
            registry,
            stats: Arc::new(RelayStats::new()),
            state,
        }
    }

    /// Get the relay configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Get a reference to the client registry
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Get a reference to the relay stats
    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    /// Current lifecycle state
    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn subscribe_state(&self) -> watch::Receiver<RelayState> {
        self.state.subscribe()
    }

    /// Bind both endpoints and launch their loops
    ///
    /// Fails with [`Error::AlreadyRunning`] unless the relay is stopped. If
    /// either bind fails nothing is left running and the relay stays stopped.
    pub async fn start(&self) -> Result<RunningRelay> {
        let claimed = self.state.send_if_modified(|state| {
            if *state == RelayState::Stopped {
                *state = RelayState::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(Error::AlreadyRunning);
        }

        tracing::info!("Relay starting");

        let listeners = async {
            let ingest =
                IngestListener::bind(self.config.ingest_addr, self.config.recv_buffer_size).await?;
            let delivery = DeliveryListener::bind(&self.config).await?;
            Ok::<_, Error>((ingest, delivery))
        };
        let (ingest, delivery) = match listeners.await {
            Ok(listeners) => listeners,
            Err(e) => {
                tracing::error!(error = %e, "Relay failed to start");
                self.state.send_replace(RelayState::Stopped);
                return Err(e);
            }
        };

        let ingest_addr = ingest.local_addr();
        let delivery_addr = delivery.local_addr();
        let shutdown = CancellationToken::new();

        let ingest_task = ListenerTask::spawn(
            Listener::Ingest,
            ingest.run(
                Arc::clone(&self.registry),
                Arc::clone(&self.stats),
                shutdown.clone(),
            ),
        );
        let delivery_task = ListenerTask::spawn(
            Listener::Delivery,
            delivery.run(
                Arc::clone(&self.registry),
                Arc::clone(&self.stats),
                shutdown.clone(),
            ),
        );
        let cleanup = self.registry.spawn_cleanup_task();

        self.state.send_replace(RelayState::Running);
        tracing::info!(
            ingest = %ingest_addr,
            delivery = %delivery_addr,
            "Relay running"
        );

        Ok(RunningRelay {
            ingest_addr,
            delivery_addr,
            shutdown,
            tasks: [ingest_task, delivery_task],
            cleanup,
            shutdown_timeout: self.config.shutdown_timeout,
            state: Arc::clone(&self.state),
            stats: Arc::clone(&self.stats),
        })
    }

    /// Run until `trigger` resolves or a listener exits on its own
    pub async fn run_until<F>(&self, trigger: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut running = self.start().await?;

        tokio::select! {
            _ = trigger => tracing::info!("Shutdown requested"),
            listener = running.wait() => {
                tracing::warn!(listener = %listener, "Listener exited unexpectedly");
            }
        }

        running.stop().await
    }
}

/// Cloneable trigger for stopping a running relay
///
/// Calling [`shutdown`](Self::shutdown) more than once is harmless.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    /// Tell both listeners to stop
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// A started relay
pub struct RunningRelay {
    ingest_addr: SocketAddr,
    delivery_addr: SocketAddr,
    shutdown: CancellationToken,
    tasks: [ListenerTask; 2],
    cleanup: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
    state: Arc<watch::Sender<RelayState>>,
    stats: Arc<RelayStats>,
}

impl RunningRelay {
    /// Address the ingestion socket is bound to
    pub fn ingest_addr(&self) -> SocketAddr {
        self.ingest_addr
    }

    /// Address the delivery listener is bound to
    pub fn delivery_addr(&self) -> SocketAddr {
        self.delivery_addr
    }

    /// Handle that listeners' loops observe
    ///
    /// Triggering it makes both loops return; [`stop`](Self::stop) still has
    /// to be called to join them and finish the transition.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            token: self.shutdown.clone(),
        }
    }

    /// Wait until either listener task finishes on its own
    ///
    /// Returns the listener that finished. The outcome is kept and reported
    /// by [`stop`](Self::stop). Pends forever if both have already finished.
    pub async fn wait(&mut self) -> Listener {
        let [ingest, delivery] = &mut self.tasks;

        tokio::select! {
            joined = &mut ingest.handle, if ingest.outcome.is_none() => {
                ingest.outcome = Some(ingest.flatten(joined));
                ingest.listener
            }
            joined = &mut delivery.handle, if delivery.outcome.is_none() => {
                delivery.outcome = Some(delivery.flatten(joined));
                delivery.listener
            }
            else => std::future::pending().await,
        }
    }

    /// Stop both listeners and wait for them
    ///
    /// Each listener gets until `shutdown_timeout` (measured from the start
    /// of the stop) before it is aborted. Every outcome is logged; the first
    /// failure is returned.
    pub async fn stop(mut self) -> Result<()> {
        self.state.send_replace(RelayState::Stopping);
        tracing::info!("Relay stopping");

        self.shutdown.cancel();
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.abort();
        }

        let deadline = Instant::now() + self.shutdown_timeout;
        let mut first_error = None;

        for task in &mut self.tasks {
            let outcome = match task.outcome.take() {
                Some(outcome) => outcome,
                None => task.join_until(deadline).await,
            };

            match outcome {
                Ok(()) => tracing::debug!(listener = %task.listener, "Listener joined"),
                Err(e) => {
                    tracing::error!(error = %e, "Listener stopped with error");
                    first_error.get_or_insert(e);
                }
            }
        }

        self.state.send_replace(RelayState::Stopped);
        let stats = self.stats.snapshot();
        tracing::info!(
            datagrams = stats.datagrams_received,
            malformed = stats.datagrams_malformed,
            broadcast = stats.sentences_broadcast,
            dropped = stats.sentences_dropped,
            delivered = stats.sentences_delivered,
            connections = stats.connections_accepted,
            "Relay stopped"
        );

        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for RunningRelay {
    fn drop(&mut self) {
        // Dropped without `stop`: the loops exit on their own, unjoined
        self.shutdown.cancel();
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.abort();
        }
        self.state.send_if_modified(|state| {
            let changed = *state != RelayState::Stopped;
            *state = RelayState::Stopped;
            changed
        });
    }
}

struct ListenerTask {
    listener: Listener,
    handle: JoinHandle<Result<()>>,
    outcome: Option<Result<()>>,
}

impl ListenerTask {
    fn spawn<F>(listener: Listener, future: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            listener,
            handle: tokio::spawn(future),
            outcome: None,
        }
    }

    fn flatten(&self, joined: std::result::Result<Result<()>, JoinError>) -> Result<()> {
        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(Error::ListenerPanicked {
                listener: self.listener,
            }),
            Err(_) => Err(Error::ListenerCancelled {
                listener: self.listener,
            }),
        }
    }

    async fn join_until(&mut self, deadline: Instant) -> Result<()> {
        let deadline = tokio::time::Instant::from_std(deadline);
        match tokio::time::timeout_at(deadline, &mut self.handle).await {
            Ok(joined) => self.flatten(joined),
            Err(_) => {
                self.handle.abort();
                Err(Error::ShutdownTimeout {
                    listener: self.listener,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use crate::registry::{ClientId, RegistryConfig};

    use super::*;

    #[tokio::test]
    async fn test_state_transitions() {
        let relay = Relay::new(RelayConfig::localhost());
        let mut states = relay.subscribe_state();
        assert_eq!(relay.state(), RelayState::Stopped);

        let running = relay.start().await.unwrap();
        assert_eq!(relay.state(), RelayState::Running);
        assert!(states.has_changed().unwrap());
        states.borrow_and_update();

        running.stop().await.unwrap();
        assert_eq!(relay.state(), RelayState::Stopped);
        assert!(states.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let relay = Relay::new(RelayConfig::localhost());
        let running = relay.start().await.unwrap();

        assert!(matches!(relay.start().await, Err(Error::AlreadyRunning)));
        assert_eq!(relay.state(), RelayState::Running);

        running.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let relay = Relay::new(RelayConfig::localhost());

        for _ in 0..2 {
            let running = relay.start().await.unwrap();
            running.stop().await.unwrap();
            assert_eq!(relay.state(), RelayState::Stopped);
        }
    }

    #[tokio::test]
    async fn test_bind_failure_leaves_relay_stopped() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = RelayConfig::localhost().delivery_addr(taken.local_addr().unwrap());
        let relay = Relay::new(config);

        let result = relay.start().await;

        assert!(matches!(
            result,
            Err(Error::Bind {
                listener: Listener::Delivery,
                ..
            })
        ));
        assert_eq!(relay.state(), RelayState::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_handle_is_idempotent() {
        let relay = Relay::new(RelayConfig::localhost());
        let mut running = relay.start().await.unwrap();
        let handle = running.shutdown_handle();

        handle.shutdown();
        handle.shutdown();
        assert!(handle.is_shutdown());

        // Both loops return on their own once triggered
        let first = tokio::time::timeout(Duration::from_secs(2), running.wait())
            .await
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), running.wait())
            .await
            .unwrap();
        assert_ne!(first, second);

        running.stop().await.unwrap();
        assert_eq!(relay.state(), RelayState::Stopped);
    }

    #[tokio::test]
    async fn test_run_until_trigger() {
        let relay = Relay::new(RelayConfig::localhost());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let mut states = relay.subscribe_state();
        let run = relay.run_until(async {
            let _ = rx.await;
        });
        tokio::pin!(run);

        tokio::select! {
            _ = &mut run => panic!("relay exited before trigger"),
            running = states.wait_for(|s| *s == RelayState::Running) => {
                running.unwrap();
            }
        }

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(relay.state(), RelayState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_reports_failed_listener() {
        let mut task = ListenerTask::spawn(Listener::Ingest, async {
            Err::<(), _>(Error::Listener {
                listener: Listener::Ingest,
                source: std::io::Error::new(std::io::ErrorKind::Other, "socket gone"),
            })
        });

        let result = task.join_until(Instant::now() + Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::Listener { .. })));
    }

    #[tokio::test]
    async fn test_join_reports_panic() {
        async fn explode() -> Result<()> {
            panic!("boom")
        }
        let mut task = ListenerTask::spawn(Listener::Delivery, explode());

        let result = task.join_until(Instant::now() + Duration::from_secs(1)).await;
        assert!(matches!(
            result,
            Err(Error::ListenerPanicked {
                listener: Listener::Delivery
            })
        ));
    }

    #[tokio::test]
    async fn test_join_times_out() {
        let mut task = ListenerTask::spawn(Listener::Ingest, std::future::pending::<Result<()>>());

        let result = task.join_until(Instant::now() + Duration::from_millis(20)).await;
        assert!(matches!(result, Err(Error::ShutdownTimeout { .. })));
    }

    #[tokio::test]
    async fn test_running_relay_evicts_idle_hosts_until_stopped() {
        let host = |last| ClientId::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)));
        let registry = RegistryConfig::default()
            .idle_eviction(Duration::from_millis(30))
            .cleanup_interval(Duration::from_millis(10));
        let relay = Relay::new(RelayConfig::localhost().registry(registry));
        let running = relay.start().await.unwrap();

        relay.registry().ensure(host(1)).await;
        let _attached = relay.registry().attach(host(2)).await;

        tokio::time::timeout(Duration::from_secs(2), async {
            while relay.registry().get(&host(1)).await.is_some() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(relay.registry().client_ids().await, vec![host(2)]);

        running.stop().await.unwrap();

        // The eviction task went away with the running relay
        relay.registry().ensure(host(3)).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(relay.registry().get(&host(3)).await.is_some());
    }
}
