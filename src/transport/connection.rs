//! # Connection
//!
//! One framed TCP stream and its two continuation chains.
//!
//! ## Lifecycle
//! ```text
//! Idle ──attach_as_client_end──▶ Connecting ──▶ Connected ──disconnect──▶ Closing ──▶ Closed
//!   └───────────────attach_as_server_end────────────▲            any I/O failure ──────▲
//! ```
//!
//! ## Read chain
//! Header, then body (if any), then delivery to the shared inbox, then the
//! next header, until the peer goes away or a frame cannot be decoded.
//!
//! ## Write chain
//! Header of the front message, its body if non-empty, pop, and continue
//! while the outgoing queue is non-empty. [`Connection::send`] arms the
//! chain only when it finds the queue empty. That check and the chain's own
//! "pop, then look for more" step both run on the endpoint's single reactor
//! thread with no `.await` in between, so at most one write chain is ever in
//! flight per connection.
//!
//! Any transport error is terminal: the connection closes, both chains halt,
//! and queued outgoing messages are discarded. Nothing is retried here.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::TransportConfig;
use crate::core::codec::MessageCodec;
use crate::core::message::{ConnectionId, Message, MessageKind, OwnedMessage};
use crate::error::{ProtocolError, Result};
use crate::utils::metrics::Metrics;
use crate::utils::queue::ThreadSafeQueue;

/// Which endpoint owns a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Idle = 0,
    Connecting = 1,
    Connected = 2,
    Closing = 3,
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Shared inbox every connection of an endpoint delivers into
pub type Inbox<K> = Arc<ThreadSafeQueue<OwnedMessage<K>>>;

pub struct Connection<K: MessageKind> {
    id: AtomicU32,
    role: Role,
    state: AtomicU8,
    peer_addr: OnceLock<SocketAddr>,
    // accepted socket waiting for attach_as_server_end
    socket: Mutex<Option<TcpStream>>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    outgoing: ThreadSafeQueue<Message<K>>,
    incoming: Inbox<K>,
    closed: CancellationToken,
    runtime: Handle,
    metrics: Arc<Metrics>,
    transport: TransportConfig,
}

impl<K: MessageKind> Connection<K> {
    /// Unconnected client-role connection delivering into `incoming`
    pub fn new_client(
        runtime: Handle,
        incoming: Inbox<K>,
        metrics: Arc<Metrics>,
        transport: TransportConfig,
    ) -> Arc<Self> {
        Arc::new(Self::build(Role::Client, None, runtime, incoming, metrics, transport))
    }

    /// Server-role connection wrapping an accepted socket. Nothing is read
    /// or written until [`attach_as_server_end`](Self::attach_as_server_end).
    pub fn new_server(
        stream: TcpStream,
        runtime: Handle,
        incoming: Inbox<K>,
        metrics: Arc<Metrics>,
        transport: TransportConfig,
    ) -> Arc<Self> {
        Arc::new(Self::build(
            Role::Server,
            Some(stream),
            runtime,
            incoming,
            metrics,
            transport,
        ))
    }

    fn build(
        role: Role,
        stream: Option<TcpStream>,
        runtime: Handle,
        incoming: Inbox<K>,
        metrics: Arc<Metrics>,
        transport: TransportConfig,
    ) -> Self {
        let peer_addr = OnceLock::new();
        if let Some(addr) = stream.as_ref().and_then(|s| s.peer_addr().ok()) {
            let _ = peer_addr.set(addr);
        }

        Self {
            id: AtomicU32::new(0),
            role,
            state: AtomicU8::new(ConnectionState::Idle as u8),
            peer_addr,
            socket: Mutex::new(stream),
            writer: tokio::sync::Mutex::new(None),
            outgoing: ThreadSafeQueue::new(),
            incoming,
            closed: CancellationToken::new(),
            runtime,
            metrics,
            transport,
        }
    }

    /// Pool id; `0` for client-role connections and before attachment
    pub fn id(&self) -> ConnectionId {
        self.id.load(Ordering::Acquire)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr.get().copied()
    }

    /// Messages queued but not yet fully written
    pub fn queued(&self) -> usize {
        self.outgoing.count()
    }

    /// Assign `id` and start reading from the accepted socket.
    ///
    /// Fails without side effects on a client-role connection or when there
    /// is no unattached socket.
    pub fn attach_as_server_end(self: &Arc<Self>, id: ConnectionId) -> Result<()> {
        if self.role != Role::Server {
            return Err(ProtocolError::InvalidState(
                "attach_as_server_end called on a client connection".to_string(),
            ));
        }

        let stream = self
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ProtocolError::NotConnected)?;

        self.id.store(id, Ordering::Release);
        self.install(stream, ConnectionState::Idle)?;
        debug!(id, peer = ?self.peer_addr(), "Server end attached");
        Ok(())
    }

    /// Connect to the first reachable endpoint, in order, then start reading.
    ///
    /// Each attempt is bounded by `timeout`. On failure the connection ends
    /// up `Closed` and the last error is returned.
    #[instrument(skip(self, endpoints), fields(candidates = endpoints.len()))]
    pub async fn attach_as_client_end(
        self: Arc<Self>,
        endpoints: Vec<SocketAddr>,
        timeout: Duration,
    ) -> Result<()> {
        if self.role != Role::Client {
            return Err(ProtocolError::InvalidState(
                "attach_as_client_end called on a server connection".to_string(),
            ));
        }
        if !self.transition(ConnectionState::Idle, ConnectionState::Connecting) {
            return Err(ProtocolError::InvalidState(format!(
                "cannot connect from state {:?}",
                self.state()
            )));
        }

        let mut last_error =
            ProtocolError::ConnectFailure("no endpoints to connect to".to_string());

        for addr in endpoints {
            let attempt = tokio::select! {
                _ = self.closed.cancelled() => {
                    last_error = ProtocolError::ConnectionClosed;
                    break;
                }
                attempt = tokio::time::timeout(timeout, TcpStream::connect(addr)) => attempt,
            };

            match attempt {
                Ok(Ok(stream)) => {
                    return match self.install(stream, ConnectionState::Connecting) {
                        Ok(()) => {
                            info!(peer = %addr, "Connected to server");
                            Ok(())
                        }
                        Err(e) => {
                            self.close();
                            Err(e)
                        }
                    };
                }
                Ok(Err(e)) => {
                    debug!(peer = %addr, error = %e, "Connect attempt failed");
                    last_error = ProtocolError::ConnectFailure(format!("{addr}: {e}"));
                }
                Err(_) => {
                    debug!(peer = %addr, ?timeout, "Connect attempt timed out");
                    last_error = ProtocolError::Timeout;
                }
            }
        }

        self.metrics.transport_error();
        self.close();
        warn!(error = %last_error, "Unable to connect");
        Err(last_error)
    }

    /// Queue `message` for writing. Callable from any thread.
    ///
    /// The append runs on the reactor; a message for a connection that is
    /// no longer connected is dropped there.
    pub fn send(self: &Arc<Self>, message: Message<K>) {
        let connection = Arc::clone(self);
        self.runtime.spawn(async move {
            if !connection.is_connected() {
                debug!(
                    id = connection.id(),
                    kind = ?message.kind(),
                    "Dropping message for a closed connection"
                );
                return;
            }

            let writing = !connection.outgoing.is_empty();
            connection.outgoing.push_back(message);
            if !writing {
                tokio::spawn(connection.write_chain());
            }
        });
    }

    /// Schedule the socket to close. Idempotent.
    pub fn disconnect(self: &Arc<Self>) {
        match self.state() {
            ConnectionState::Connected => {
                if self.transition(ConnectionState::Connected, ConnectionState::Closing) {
                    let connection = Arc::clone(self);
                    self.runtime.spawn(async move { connection.close() });
                }
            }
            ConnectionState::Idle | ConnectionState::Connecting => self.close(),
            ConnectionState::Closing | ConnectionState::Closed => {}
        }
    }

    /// Close immediately from whatever thread we are on. Safe to repeat.
    pub(crate) fn close(&self) {
        let previous =
            ConnectionState::from_u8(self.state.swap(ConnectionState::Closed as u8, Ordering::AcqRel));
        if previous == ConnectionState::Closed {
            return;
        }

        self.closed.cancel();
        self.socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // a running write chain holds the lock and drops the half itself
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }

        let dropped = self.outgoing.count();
        self.outgoing.clear();

        if matches!(
            previous,
            ConnectionState::Connected | ConnectionState::Closing
        ) {
            self.metrics.connection_closed();
        }

        debug!(
            id = self.id(),
            role = ?self.role,
            ?previous,
            dropped,
            "Connection closed"
        );
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn install(self: &Arc<Self>, stream: TcpStream, from: ConnectionState) -> Result<()> {
        if self.transport.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                debug!(error = %e, "Failed to set TCP_NODELAY");
            }
        }
        if let Ok(addr) = stream.peer_addr() {
            let _ = self.peer_addr.set(addr);
        }

        let (reader, writer) = stream.into_split();
        match self.writer.try_lock() {
            Ok(mut slot) => *slot = Some(writer),
            Err(_) => {
                return Err(ProtocolError::InvalidState(
                    "write half already in use".to_string(),
                ))
            }
        }

        if !self.transition(from, ConnectionState::Connected) {
            // disconnected while attaching
            self.close();
            if let Ok(mut slot) = self.writer.try_lock() {
                slot.take();
            }
            return Err(ProtocolError::ConnectionClosed);
        }

        self.metrics.connection_established();
        self.runtime.spawn(Arc::clone(self).read_chain(reader));
        Ok(())
    }

    async fn read_chain(self: Arc<Self>, reader: OwnedReadHalf) {
        let codec = MessageCodec::<K>::with_max_body_size(self.transport.max_body_size);
        let mut frames = FramedRead::new(reader, codec);

        loop {
            let next = tokio::select! {
                _ = self.closed.cancelled() => break,
                next = frames.next() => next,
            };

            match next {
                Some(Ok(message)) => self.deliver(message),
                Some(Err(e)) => {
                    warn!(id = self.id(), peer = ?self.peer_addr(), error = %e, "Read failed");
                    self.metrics.transport_error();
                    break;
                }
                None => {
                    debug!(id = self.id(), peer = ?self.peer_addr(), "Peer closed the connection");
                    break;
                }
            }
        }

        self.close();
    }

    fn deliver(&self, message: Message<K>) {
        self.metrics.message_received(message.size() as u64);
        let source = match self.role {
            Role::Server => Some(self.id()),
            Role::Client => None,
        };
        trace!(id = self.id(), kind = ?message.kind(), size = message.size(), "Message delivered");
        self.incoming.push_back(OwnedMessage { source, message });
    }

    async fn write_chain(self: Arc<Self>) {
        let mut slot = self.writer.lock().await;
        let Some(writer) = slot.as_mut() else {
            self.outgoing.clear();
            return;
        };

        while let Some(message) = self.outgoing.front() {
            let written = tokio::select! {
                _ = self.closed.cancelled() => Err(ProtocolError::ConnectionClosed),
                written = write_message(writer, &message) => written,
            };

            if let Err(e) = written {
                if !matches!(e, ProtocolError::ConnectionClosed) {
                    warn!(id = self.id(), peer = ?self.peer_addr(), error = %e, "Write failed");
                    self.metrics.transport_error();
                }
                slot.take();
                drop(slot);
                self.close();
                return;
            }

            self.metrics.message_sent(message.size() as u64);
            self.outgoing.pop_front();
        }
    }
}

async fn write_message<K: MessageKind>(
    writer: &mut OwnedWriteHalf,
    message: &Message<K>,
) -> Result<()> {
    writer.write_all(&message.header().to_bytes()).await?;
    if !message.body().is_empty() {
        writer.write_all(message.body()).await?;
    }
    Ok(())
}

impl<K: MessageKind> fmt::Debug for Connection<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("role", &self.role)
            .field("state", &self.state())
            .field("peer_addr", &self.peer_addr())
            .field("queued", &self.outgoing.count())
            .finish()
    }
}
