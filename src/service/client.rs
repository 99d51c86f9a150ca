//! # Client Endpoint
//!
//! Owns one connection to a server and the reactor thread driving it.
//!
//! ```rust,no_run
//! use framewire::core::message::Message;
//! use framewire::service::client::ClientEndpoint;
//!
//! let mut client = ClientEndpoint::<u16>::new();
//! client.connect("127.0.0.1", 60000)?;
//! client.send(Message::new(0))?;
//!
//! loop {
//!     if let Some(mut reply) = client.incoming().pop_front() {
//!         let value: u32 = reply.message.pop()?;
//!         println!("server says {value}");
//!         break;
//!     }
//! }
//! client.disconnect();
//! # Ok::<(), framewire::error::ProtocolError>(())
//! ```
//!
//! `connect` blocks the calling thread until the connect attempt finishes;
//! call it from a plain thread, not from inside an async task.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{mpsc, Arc};

use tracing::{info, instrument, warn};

use crate::config::{ClientConfig, NetworkConfig, TransportConfig};
use crate::core::message::{Message, MessageKind, OwnedMessage};
use crate::error::{ProtocolError, Result};
use crate::transport::connection::{Connection, Inbox};
use crate::transport::reactor::Reactor;
use crate::utils::metrics::Metrics;
use crate::utils::queue::ThreadSafeQueue;

/// Client side of a framewire session
#[derive(Debug)]
pub struct ClientEndpoint<K: MessageKind> {
    config: ClientConfig,
    transport: TransportConfig,
    incoming: Inbox<K>,
    metrics: Arc<Metrics>,
    connection: Option<Arc<Connection<K>>>,
    reactor: Option<Reactor>,
}

impl<K: MessageKind> ClientEndpoint<K> {
    pub fn new() -> Self {
        Self::with_config(&NetworkConfig::default())
    }

    pub fn with_config(config: &NetworkConfig) -> Self {
        Self {
            config: config.client.clone(),
            transport: config.transport.clone(),
            incoming: Arc::new(ThreadSafeQueue::new()),
            metrics: Arc::new(Metrics::new()),
            connection: None,
            reactor: None,
        }
    }

    /// Resolve `host:port`, start the reactor, and connect.
    ///
    /// An existing session is torn down first. Messages already in the
    /// inbox are kept.
    #[instrument(skip(self))]
    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        if self.reactor.is_some() {
            self.disconnect();
        }

        let endpoints: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| ProtocolError::ResolutionFailure(format!("{host}:{port}: {e}")))?
            .collect();
        if endpoints.is_empty() {
            return Err(ProtocolError::ResolutionFailure(format!(
                "{host}:{port}: no addresses found"
            )));
        }

        let reactor = Reactor::start("framewire-client")?;
        let connection = Connection::new_client(
            reactor.handle().clone(),
            Arc::clone(&self.incoming),
            Arc::clone(&self.metrics),
            self.transport.clone(),
        );

        let (tx, rx) = mpsc::channel();
        let attach = Arc::clone(&connection)
            .attach_as_client_end(endpoints, self.config.connection_timeout);
        reactor.handle().spawn(async move {
            let _ = tx.send(attach.await);
        });

        self.connection = Some(connection);
        self.reactor = Some(reactor);

        let outcome = rx.recv().unwrap_or_else(|_| {
            Err(ProtocolError::ConnectFailure(
                "reactor stopped before the connect attempt finished".to_string(),
            ))
        });

        if let Err(e) = outcome {
            warn!(host, port, error = %e, "Client connect failed");
            self.disconnect();
            return Err(e);
        }

        info!(host, port, "Client connected");
        Ok(())
    }

    /// Close the connection, stop the reactor, and join its thread.
    pub fn disconnect(&mut self) {
        if let Some(connection) = &self.connection {
            if connection.is_connected() {
                connection.disconnect();
            }
        }

        if let Some(mut reactor) = self.reactor.take() {
            reactor.stop();
            info!("Client disconnected");
        }

        // with the reactor gone nothing else will finish the close
        if let Some(connection) = &self.connection {
            connection.close();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| connection.is_connected())
    }

    /// Queue `message` for the server
    pub fn send(&self, message: Message<K>) -> Result<()> {
        match &self.connection {
            Some(connection) if connection.is_connected() => {
                connection.send(message);
                Ok(())
            }
            _ => Err(ProtocolError::NotConnected),
        }
    }

    /// Messages received from the server, oldest first
    pub fn incoming(&self) -> &ThreadSafeQueue<OwnedMessage<K>> {
        &self.incoming
    }

    pub fn connection(&self) -> Option<&Arc<Connection<K>>> {
        self.connection.as_ref()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

impl<K: MessageKind> Default for ClientEndpoint<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: MessageKind> Drop for ClientEndpoint<K> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
