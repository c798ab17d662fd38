//! Ingestion listener
//!
//! Receives log datagrams over UDP, extracts sentences and fans them out to
//! every registered buffer.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::protocol::{extract_sentence, ExtractError};
use crate::registry::ClientRegistry;
use crate::server::Listener;
use crate::stats::RelayStats;

/// UDP side of the relay
pub struct IngestListener {
    socket: UdpSocket,
    local_addr: SocketAddr,
    recv_buffer_size: usize,
}

impl IngestListener {
    /// Bind the ingestion socket
    pub async fn bind(addr: SocketAddr, recv_buffer_size: usize) -> Result<Self> {
        let bind_err = |source| Error::Bind {
            listener: Listener::Ingest,
            addr,
            source,
        };

        let socket = UdpSocket::bind(addr).await.map_err(bind_err)?;
        let local_addr = socket.local_addr().map_err(bind_err)?;

        tracing::info!(addr = %local_addr, "Ingestion listener bound");

        Ok(Self {
            socket,
            local_addr,
            recv_buffer_size: recv_buffer_size.max(1),
        })
    }

    /// Address the socket is actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receive datagrams until `shutdown` is cancelled
    pub async fn run(
        self,
        registry: Arc<ClientRegistry>,
        stats: Arc<RelayStats>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let mut buf = vec![0u8; self.recv_buffer_size];

        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((len, peer)) => {
                    stats.record_datagram();
                    handle_datagram(&buf[..len], peer, &registry, &stats).await;
                }
                Err(e) if is_transient(&e) => {
                    tracing::debug!(error = %e, "Transient receive error");
                }
                Err(source) => {
                    tracing::error!(error = %source, "Ingestion socket failed");
                    return Err(Error::Listener {
                        listener: Listener::Ingest,
                        source,
                    });
                }
            }
        }

        tracing::info!(addr = %self.local_addr, "Ingestion listener stopped");
        Ok(())
    }
}

/// Extract one datagram and fan the sentence out
pub(crate) async fn handle_datagram(
    datagram: &[u8],
    peer: SocketAddr,
    registry: &ClientRegistry,
    stats: &RelayStats,
) {
    let sentence = match extract_sentence(datagram) {
        Ok(Some(sentence)) => sentence,
        Ok(None) => return,
        Err(e) => {
            stats.record_malformed();
            log_malformed(datagram, peer, &e);
            return;
        }
    };

    let report = registry.broadcast(&sentence).await;
    stats.record_broadcast(report.dropped);

    tracing::trace!(
        peer = %peer,
        recipients = report.recipients,
        dropped = report.dropped,
        sentence = %sentence,
        "Sentence broadcast"
    );
}

fn log_malformed(datagram: &[u8], peer: SocketAddr, error: &ExtractError) {
    let data = String::from_utf8_lossy(datagram);
    tracing::warn!(
        peer = %peer,
        error = %error,
        data = %data.trim(),
        "Received malformed GPS log message"
    );
}

/// Receive errors that say nothing about the socket itself
///
/// On some platforms an ICMP port-unreachable from an earlier send surfaces
/// as `ConnectionReset` on the next receive.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}
