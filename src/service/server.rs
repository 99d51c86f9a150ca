//! # Server Endpoint
//!
//! Listens on a TCP port, admits clients through a [`ServerHandler`], and
//! keeps every admitted connection in an ordered pool.
//!
//! Accepting, reading, and writing happen on the endpoint's reactor thread.
//! Application code drains the inbox by calling [`ServerEndpoint::update`],
//! which runs [`ServerHandler::on_message`] on the calling thread.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use framewire::core::message::Message;
//! use framewire::service::server::{ServerEndpoint, ServerHandler};
//! use framewire::transport::connection::Connection;
//!
//! struct Echo;
//!
//! impl ServerHandler<u16> for Echo {
//!     fn on_client_connect(&self, _connection: &Arc<Connection<u16>>) -> bool {
//!         true
//!     }
//!
//!     fn on_message(&self, connection: Option<&Arc<Connection<u16>>>, message: Message<u16>) {
//!         if let Some(connection) = connection {
//!             connection.send(message);
//!         }
//!     }
//! }
//!
//! let mut server = ServerEndpoint::new(60000, Echo);
//! server.start()?;
//! loop {
//!     server.update(None);
//!     # break;
//! }
//! # Ok::<(), framewire::error::ProtocolError>(())
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{NetworkConfig, ServerConfig, TransportConfig};
use crate::core::message::{ConnectionId, Message, MessageKind, OwnedMessage};
use crate::error::{ProtocolError, Result};
use crate::transport::connection::{Connection, Inbox};
use crate::transport::reactor::Reactor;
use crate::utils::metrics::Metrics;
use crate::utils::queue::ThreadSafeQueue;

/// Application callbacks for a [`ServerEndpoint`].
///
/// `on_client_connect` runs on the reactor thread before the connection is
/// given an id. The other two run on whichever thread calls into the
/// endpoint.
pub trait ServerHandler<K: MessageKind>: Send + Sync + 'static {
    /// Return `false` to refuse the client; its socket is closed immediately.
    fn on_client_connect(&self, connection: &Arc<Connection<K>>) -> bool;

    /// A pooled connection was found dead and is about to leave the pool
    fn on_client_disconnect(&self, connection: &Arc<Connection<K>>) {
        let _ = connection;
    }

    /// `connection` is `None` when the sender has already left the pool
    fn on_message(&self, connection: Option<&Arc<Connection<K>>>, message: Message<K>);
}

struct Shared<K: MessageKind, H> {
    handler: H,
    pool: Mutex<Vec<Arc<Connection<K>>>>,
    incoming: Inbox<K>,
    next_id: AtomicU32,
    metrics: Arc<Metrics>,
    transport: TransportConfig,
}

impl<K: MessageKind, H: ServerHandler<K>> Shared<K, H> {
    fn pool(&self) -> MutexGuard<'_, Vec<Arc<Connection<K>>>> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self, stream: TcpStream, peer: SocketAddr, runtime: &Handle) {
        info!(peer = %peer, "New connection");

        let connection = Connection::new_server(
            stream,
            runtime.clone(),
            Arc::clone(&self.incoming),
            Arc::clone(&self.metrics),
            self.transport.clone(),
        );

        if !self.handler.on_client_connect(&connection) {
            self.metrics.connection_rejected();
            connection.disconnect();
            info!(peer = %peer, "Connection denied");
            return;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pool().push(Arc::clone(&connection));

        match connection.attach_as_server_end(id) {
            Ok(()) => info!(id, peer = %peer, "Connection approved"),
            // stays pooled until the next sweep notices it is dead
            Err(e) => warn!(id, peer = %peer, error = %e, "Failed to attach connection"),
        }
    }
}

async fn accept_loop<K: MessageKind, H: ServerHandler<K>>(
    shared: Arc<Shared<K, H>>,
    listener: TcpListener,
) {
    let runtime = Handle::current();
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => shared.admit(stream, peer, &runtime),
            Err(e) => {
                error!(error = %e, "New connection error");
                shared.metrics.transport_error();
            }
        }
    }
}

/// Server side of a framewire session
pub struct ServerEndpoint<K: MessageKind, H: ServerHandler<K>> {
    config: ServerConfig,
    shared: Arc<Shared<K, H>>,
    reactor: Option<Reactor>,
    local_addr: Option<SocketAddr>,
}

impl<K: MessageKind, H: ServerHandler<K>> ServerEndpoint<K, H> {
    /// Endpoint listening on all interfaces at `port` once started
    pub fn new(port: u16, handler: H) -> Self {
        let config = NetworkConfig {
            server: ServerConfig::with_port(port),
            ..NetworkConfig::default()
        };
        Self::with_config(&config, handler)
    }

    pub fn with_config(config: &NetworkConfig, handler: H) -> Self {
        Self {
            config: config.server.clone(),
            shared: Arc::new(Shared {
                handler,
                pool: Mutex::new(Vec::new()),
                incoming: Arc::new(ThreadSafeQueue::new()),
                next_id: AtomicU32::new(config.server.first_connection_id),
                metrics: Arc::new(Metrics::new()),
                transport: config.transport.clone(),
            }),
            reactor: None,
            local_addr: None,
        }
    }

    /// Bind the listener and start accepting on the reactor thread
    #[instrument(skip(self), fields(address = %self.config.address))]
    pub fn start(&mut self) -> Result<()> {
        if self.reactor.is_some() {
            return Err(ProtocolError::AlreadyRunning);
        }

        let listener = std::net::TcpListener::bind(self.config.address.as_str()).map_err(|e| {
            error!(error = %e, "Server failed to bind");
            ProtocolError::Io(e)
        })?;
        listener.set_nonblocking(true)?;

        let reactor = Reactor::start("framewire-server")?;
        let listener = {
            let _guard = reactor.handle().enter();
            TcpListener::from_std(listener)?
        };
        let local_addr = listener.local_addr()?;

        reactor
            .handle()
            .spawn(accept_loop(Arc::clone(&self.shared), listener));

        self.reactor = Some(reactor);
        self.local_addr = Some(local_addr);
        info!(address = %local_addr, "Server started");
        Ok(())
    }

    /// Stop accepting, join the reactor thread, and close every pooled
    /// connection. Idempotent.
    pub fn stop(&mut self) {
        let Some(mut reactor) = self.reactor.take() else {
            return;
        };
        reactor.stop();

        for connection in self.connections() {
            connection.close();
        }
        self.local_addr = None;
        self.shared.metrics.log_metrics();
        info!("Server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.reactor.is_some()
    }

    /// Hand up to `max_messages` inbox entries (all of them for `None`) to
    /// [`ServerHandler::on_message`], oldest first. Returns how many ran.
    pub fn update(&self, max_messages: Option<usize>) -> usize {
        let limit = max_messages.unwrap_or(usize::MAX);
        let mut dispatched = 0;

        while dispatched < limit {
            let Some(OwnedMessage { source, message }) = self.shared.incoming.pop_front() else {
                break;
            };
            let connection = source.and_then(|id| self.find(id));
            self.shared.handler.on_message(connection.as_ref(), message);
            dispatched += 1;
        }

        dispatched
    }

    /// Send to one client, or evict it if it is no longer connected
    pub fn message_client(&self, connection: &Arc<Connection<K>>, message: Message<K>) {
        if connection.is_connected() {
            connection.send(message);
            return;
        }

        self.shared.handler.on_client_disconnect(connection);
        let id = connection.id();
        self.shared.pool().retain(|pooled| pooled.id() != id);
        debug!(id, "Removed disconnected client");
    }

    /// Send a copy of `message` to every connected client except `ignore`,
    /// evicting the dead ones in the same pass
    pub fn message_all_clients(&self, message: &Message<K>, ignore: Option<ConnectionId>) {
        let mut dead = Vec::new();

        for connection in self.connections() {
            if !connection.is_connected() {
                self.shared.handler.on_client_disconnect(&connection);
                dead.push(connection.id());
            } else if ignore != Some(connection.id()) {
                connection.send(message.clone());
            }
        }

        if !dead.is_empty() {
            self.shared
                .pool()
                .retain(|pooled| !dead.contains(&pooled.id()));
            debug!(removed = dead.len(), "Removed disconnected clients");
        }
    }

    /// Address the listener is bound to while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Pooled connections, live or not yet swept
    pub fn connection_count(&self) -> usize {
        self.shared.pool().len()
    }

    /// Snapshot of the pool in admission order
    pub fn connections(&self) -> Vec<Arc<Connection<K>>> {
        self.shared.pool().clone()
    }

    pub fn handler(&self) -> &H {
        &self.shared.handler
    }

    pub fn incoming(&self) -> &ThreadSafeQueue<OwnedMessage<K>> {
        &self.shared.incoming
    }

    pub fn metrics(&self) -> &Metrics {
        &self.shared.metrics
    }

    fn find(&self, id: ConnectionId) -> Option<Arc<Connection<K>>> {
        self.shared
            .pool()
            .iter()
            .find(|connection| connection.id() == id)
            .cloned()
    }
}

impl<K: MessageKind, H: ServerHandler<K>> Drop for ServerEndpoint<K, H> {
    fn drop(&mut self) {
        self.stop();
    }
}
