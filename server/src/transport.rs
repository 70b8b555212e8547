//! UDP transport layer: socket ownership, peer handshakes, and the single
//! inbound envelope channel feeding the rest of the pipeline.
//!
//! The transport runs a fixed pool of reader tasks over one shared socket.
//! Handshake control messages (`HELLO`/`GOODBYE`) are intercepted here to
//! maintain the peer registries; everything else is forwarded as an
//! [`Envelope`] for the mux to route.

use log::{debug, info, warn};
use shared::{Message, FLAG_GOODBYE, FLAG_HELLO};
use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinSet;
use tokio::time::interval;

const INBOX_CAPACITY: usize = 100;
const NUM_READERS: usize = 5;
const RECV_BUF_SIZE: usize = 1024;

/// A received message paired with the address it came from. Created once
/// per datagram and consumed exactly once by whichever stage routes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sender: SocketAddr,
    pub message: Message,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("binding udp socket to {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error("already greeted")]
    AlreadyGreeted,
    #[error("server not found")]
    ServerNotFound,
    #[error("transport is closed")]
    Closed,
    #[error("writing message to {dest}: {source}")]
    Send { dest: SocketAddr, source: io::Error },
    #[error("send to {dest} timed out")]
    SendTimeout { dest: SocketAddr },
    #[error("closing transport: {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Close(Vec<TransportError>),
}

/// Counters owned by the transport, sampled by its rate-report task.
#[derive(Debug, Default)]
struct TransportMetrics {
    handled: AtomicU32,
}

/// One UDP socket plus the peer registries built from handshake traffic.
///
/// `clients` holds peers that greeted us; `servers` holds peers we greeted.
/// Both are advisory liveness records, not authenticated sessions.
pub struct Transport {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<HashSet<SocketAddr>>>,
    servers: RwLock<HashSet<SocketAddr>>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
}

impl Transport {
    /// Binds the socket and starts the reader pool and the statistics
    /// task, returning the transport together with the receive end of the
    /// inbound envelope channel. Returns immediately; readers run until
    /// [`Transport::close`].
    pub async fn bind(addr: &str) -> Result<(Self, mpsc::Receiver<Envelope>), TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let socket = Arc::new(socket);
        info!("transport listening on {}", addr);

        let clients = Arc::new(RwLock::new(HashSet::new()));
        let metrics = Arc::new(TransportMetrics::default());
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        // Five readers absorb burst arrival without growing unboundedly.
        for _ in 0..NUM_READERS {
            tokio::spawn(read_loop(
                Arc::clone(&socket),
                Arc::clone(&clients),
                inbox_tx.clone(),
                shutdown.subscribe(),
                Arc::clone(&metrics),
            ));
        }
        // Readers hold the only senders; the inbox closes when they stop.
        drop(inbox_tx);

        tokio::spawn(report_rate(metrics, shutdown.subscribe()));

        Ok((
            Self {
                socket,
                clients,
                servers: RwLock::new(HashSet::new()),
                shutdown,
                closed: AtomicBool::new(false),
            },
            inbox_rx,
        ))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sends a `HELLO` to `dest` and records it as a known server peer.
    ///
    /// Idempotency guard only: the handshake is not acknowledged, so the
    /// registry records intent, not confirmed reachability.
    // TODO: confirm delivery before recording the peer (requires an ack)
    pub async fn greet(&self, dest: SocketAddr, timeout: Duration) -> Result<(), TransportError> {
        if self.servers.read().await.contains(&dest) {
            return Err(TransportError::AlreadyGreeted);
        }

        self.send_to(dest, &Message::control(FLAG_HELLO), timeout)
            .await?;
        self.servers.write().await.insert(dest);
        Ok(())
    }

    /// Sends a `GOODBYE` to `dest` and forgets it as a server peer.
    pub async fn farewell(
        &self,
        dest: SocketAddr,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        if !self.servers.read().await.contains(&dest) {
            return Err(TransportError::ServerNotFound);
        }

        self.send_to(dest, &Message::control(FLAG_GOODBYE), timeout)
            .await?;
        self.servers.write().await.remove(&dest);
        Ok(())
    }

    /// Best-effort send bounded by `timeout`. The caller observes either
    /// the write error or [`TransportError::SendTimeout`], never silent
    /// success after the deadline.
    pub async fn send_to(
        &self,
        dest: SocketAddr,
        msg: &Message,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        send_raw(&self.socket, dest, &msg.encode(), timeout).await
    }

    /// Sends `msg` to every currently known client concurrently. All
    /// destinations are attempted regardless of individual failures; the
    /// first error encountered is returned once every send has resolved.
    pub async fn broadcast(&self, msg: &Message, timeout: Duration) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        // Snapshot under the lock so concurrent handshakes cannot mutate
        // the registry mid-fanout.
        let targets: Vec<SocketAddr> = self.clients.read().await.iter().copied().collect();

        let mut sends = JoinSet::new();
        for dest in targets {
            let socket = Arc::clone(&self.socket);
            let data = msg.encode();
            sends.spawn(async move { send_raw(&socket, dest, &data, timeout).await });
        }

        let mut first_err = None;
        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
                Err(e) => warn!("broadcast send task failed: {}", e),
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Farewells every known server peer, then stops the readers, which
    /// closes the inbound channel. Individual farewell failures are
    /// accumulated, never silently swallowed, and do not abort shutdown.
    pub async fn close(&self, timeout: Duration) -> Result<(), TransportError> {
        let mut errs = Vec::new();

        let peers: Vec<SocketAddr> = self.servers.read().await.iter().copied().collect();
        for dest in peers {
            if let Err(e) = self.farewell(dest, timeout).await {
                errs.push(e);
            }
        }

        self.closed.store(true, Ordering::Release);
        let _ = self.shutdown.send(true);

        if errs.is_empty() {
            Ok(())
        } else {
            Err(TransportError::Close(errs))
        }
    }

    #[cfg(test)]
    async fn register_client(&self, addr: SocketAddr) {
        self.clients.write().await.insert(addr);
    }

    #[cfg(test)]
    async fn known_servers(&self) -> usize {
        self.servers.read().await.len()
    }

    #[cfg(test)]
    async fn is_known_client(&self, addr: SocketAddr) -> bool {
        self.clients.read().await.contains(&addr)
    }
}

async fn send_raw(
    socket: &UdpSocket,
    dest: SocketAddr,
    data: &[u8],
    timeout: Duration,
) -> Result<(), TransportError> {
    match tokio::time::timeout(timeout, socket.send_to(data, dest)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(source)) => Err(TransportError::Send { dest, source }),
        Err(_) => Err(TransportError::SendTimeout { dest }),
    }
}

/// One reader of the shared socket. A malformed packet is logged and
/// skipped, never fatal; the loop ends only on the shutdown signal.
async fn read_loop(
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<HashSet<SocketAddr>>>,
    inbox: mpsc::Sender<Envelope>,
    mut shutdown: watch::Receiver<bool>,
    metrics: Arc<TransportMetrics>,
) {
    let mut buf = [0u8; RECV_BUF_SIZE];
    loop {
        let (len, sender) = tokio::select! {
            result = socket.recv_from(&mut buf) => match result {
                Ok(received) => received,
                Err(e) => {
                    warn!("failed to read from udp: {}", e);
                    continue;
                }
            },
            _ = shutdown.changed() => break,
        };

        let message = match Message::decode(&buf[..len]) {
            Ok(message) => message,
            Err(e) => {
                warn!("failed to decode datagram from {}: {}", sender, e);
                continue;
            }
        };

        if message.has_flag(FLAG_HELLO) {
            clients.write().await.insert(sender);
            info!("new client connected: {}", sender);
            continue;
        } else if message.has_flag(FLAG_GOODBYE) {
            clients.write().await.remove(&sender);
            info!("client disconnected: {}", sender);
            continue;
        }

        if inbox.send(Envelope { sender, message }).await.is_err() {
            // Inbox receiver dropped; nothing left to deliver to.
            break;
        }
        metrics.handled.fetch_add(1, Ordering::Relaxed);
    }
}

async fn report_rate(metrics: Arc<TransportMetrics>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let handled = metrics.handled.swap(0, Ordering::Relaxed);
                debug!("read rate: {} msgs/s", handled);
            }
            _ = shutdown.changed() => break,
        }
    }
}
