//! Delivery listener
//!
//! Handles the TCP accept loop and spawns one worker per consumer
//! connection. Each worker drains its host's buffer onto the socket and
//! watches the read side so a vanished consumer releases its buffer and its
//! connection slot without waiting for the next sentence.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::protocol::CRLF;
use crate::registry::{ClientId, ClientRegistry, OutboundBuffer, Sentence};
use crate::server::config::RelayConfig;
use crate::server::Listener;
use crate::stats::RelayStats;

/// Pause after a failed accept so a persistent error (e.g. out of file
/// descriptors) doesn't spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Scratch space for whatever a consumer sends us; the bytes are discarded
const DISCARD_BUFFER_SIZE: usize = 512;

/// TCP side of the relay
pub struct DeliveryListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    tcp_nodelay: bool,
    append_crlf: bool,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl DeliveryListener {
    /// Bind the delivery socket
    pub async fn bind(config: &RelayConfig) -> Result<Self> {
        let addr = config.delivery_addr;
        let bind_err = |source| Error::Bind {
            listener: Listener::Delivery,
            addr,
            source,
        };

        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        tracing::info!(addr = %local_addr, "Delivery listener bound");

        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Ok(Self {
            listener,
            local_addr,
            tcp_nodelay: config.tcp_nodelay,
            append_crlf: config.append_crlf,
            next_session_id: AtomicU64::new(1),
            connection_semaphore,
        })
    }

    /// Address the listener is actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` is cancelled, then wait for every
    /// worker to finish
    pub async fn run(
        self,
        registry: Arc<ClientRegistry>,
        stats: Arc<RelayStats>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let mut workers = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer_addr)) => {
                        self.handle_connection(socket, peer_addr, &registry, &stats, &shutdown, &mut workers);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = workers.join_next(), if !workers.is_empty() => reap(joined),
            }
        }

        let Self {
            listener,
            local_addr,
            ..
        } = self;
        // Stop accepting before draining the workers
        drop(listener);

        tracing::debug!(workers = workers.len(), "Waiting for delivery workers");
        while let Some(joined) = workers.join_next().await {
            reap(joined);
        }

        tracing::info!(addr = %local_addr, "Delivery listener stopped");
        Ok(())
    }

    fn handle_connection(
        &self,
        socket: TcpStream,
        peer_addr: SocketAddr,
        registry: &Arc<ClientRegistry>,
        stats: &Arc<RelayStats>,
        shutdown: &CancellationToken,
        workers: &mut JoinSet<()>,
    ) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match Arc::clone(sem).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    stats.record_connection_rejected();
                    return;
                }
            }
        } else {
            None
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            session_id = session_id,
            peer = %peer_addr,
            "New connection"
        );

        if self.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let session = Session {
            id: session_id,
            peer_addr,
            append_crlf: self.append_crlf,
            permit,
        };

        workers.spawn(session.run(
            socket,
            Arc::clone(registry),
            Arc::clone(stats),
            shutdown.child_token(),
        ));
    }
}

fn reap(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!(error = %e, "Delivery worker panicked");
        }
    }
}

/// One accepted consumer connection
struct Session {
    id: u64,
    peer_addr: SocketAddr,
    append_crlf: bool,
    /// Held for the life of the connection
    permit: Option<OwnedSemaphorePermit>,
}

impl Session {
    async fn run(
        self,
        socket: TcpStream,
        registry: Arc<ClientRegistry>,
        stats: Arc<RelayStats>,
        shutdown: CancellationToken,
    ) {
        let client = ClientId::from_peer(self.peer_addr);
        let reader = registry.attach(client).await;

        stats.record_connection_opened();
        tracing::debug!(
            session_id = self.id,
            client = %client,
            buffered = reader.buffer().len(),
            "Delivery started"
        );

        let (read_half, write_half) = socket.into_split();
        let result = deliver(
            read_half,
            write_half,
            reader.buffer(),
            &stats,
            &shutdown,
            self.append_crlf,
        )
        .await;

        // Detach and give the slot back before the close is observable
        drop(reader);
        drop(self.permit);
        stats.record_connection_closed();

        match result {
            Ok(DeliveryEnd::Shutdown) => {
                tracing::debug!(session_id = self.id, "Connection closed on shutdown")
            }
            Ok(DeliveryEnd::PeerClosed) => tracing::debug!(
                session_id = self.id,
                client = %client,
                "Connection closed by peer"
            ),
            Err(e) => tracing::debug!(
                session_id = self.id,
                client = %client,
                error = %e,
                "Connection closed"
            ),
        }
    }
}

/// Why a delivery loop ended without an IO error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryEnd {
    /// The shutdown token fired
    Shutdown,
    /// The consumer closed its side of the connection
    PeerClosed,
}

/// Drain `buffer` onto `writer` until the peer goes away or `shutdown` fires
///
/// While waiting for a sentence the loop also reads from `reader`. End of
/// stream or a read error ends delivery before another sentence is taken
/// from the buffer. Anything the consumer sends is discarded.
///
/// The buffer is left in place however the loop ends, so a later connection
/// from the same host picks up where this one stopped.
pub async fn deliver<R, W>(
    mut reader: R,
    mut writer: W,
    buffer: &OutboundBuffer,
    stats: &RelayStats,
    shutdown: &CancellationToken,
    append_crlf: bool,
) -> io::Result<DeliveryEnd>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut discard = [0u8; DISCARD_BUFFER_SIZE];

    loop {
        let sentence = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(DeliveryEnd::Shutdown),
            read = reader.read(&mut discard) => match read? {
                0 => return Ok(DeliveryEnd::PeerClosed),
                n => {
                    tracing::trace!(bytes = n, "Ignoring data from consumer");
                    continue;
                }
            },
            sentence = buffer.recv() => sentence,
        };

        tokio::select! {
            _ = shutdown.cancelled() => return Ok(DeliveryEnd::Shutdown),
            written = write_sentence(&mut writer, &sentence, append_crlf) => {
                let len = written?;
                stats.record_delivery(len);
            }
        }

        tracing::trace!(sentence = %sentence, "Sentence delivered");
    }
}

async fn write_sentence<W>(writer: &mut W, sentence: &Sentence, append_crlf: bool) -> io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let len = if append_crlf {
        let mut frame = BytesMut::with_capacity(sentence.len() + CRLF.len());
        frame.extend_from_slice(sentence.as_bytes());
        frame.extend_from_slice(CRLF);
        writer.write_all(&frame).await?;
        frame.len()
    } else {
        writer.write_all(sentence.as_bytes()).await?;
        sentence.len()
    };

    writer.flush().await?;
    Ok(len)
}
