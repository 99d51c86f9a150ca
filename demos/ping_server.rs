//! Example: Ping server
//!
//! Answers every `Ping` with a `Pong` carrying the number 15 and relays
//! `Chat` messages to every other client.
//!
//! Run with: `cargo run --example ping_server`
//! Override the listen address with `FRAMEWIRE_SERVER_ADDRESS=127.0.0.1:7000`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use framewire::config::NetworkConfig;
use framewire::core::message::{ConnectionId, Message};
use framewire::message_kind;
use framewire::service::{ServerEndpoint, ServerHandler};
use framewire::transport::Connection;
use framewire::utils::logging::init_logging;
use tracing::info;

message_kind! {
    pub enum Kind: u32 {
        Ping = 0,
        Pong = 1,
        Chat = 2,
    }
}

#[derive(Default)]
struct Pinger {
    chat: Mutex<Vec<(ConnectionId, Message<Kind>)>>,
}

impl ServerHandler<Kind> for Pinger {
    fn on_client_connect(&self, connection: &Arc<Connection<Kind>>) -> bool {
        info!(peer = ?connection.peer_addr(), "Client knocking");
        true
    }

    fn on_client_disconnect(&self, connection: &Arc<Connection<Kind>>) {
        info!(id = connection.id(), "Client gone");
    }

    fn on_message(&self, connection: Option<&Arc<Connection<Kind>>>, message: Message<Kind>) {
        let Some(connection) = connection else {
            return;
        };

        match message.kind() {
            Kind::Ping => {
                let mut pong = Message::new(Kind::Pong);
                if pong.push(15u32).is_ok() {
                    connection.send(pong);
                }
            }
            Kind::Chat => {
                if let Ok(mut chat) = self.chat.lock() {
                    chat.push((connection.id(), message));
                }
            }
            Kind::Pong => {}
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = NetworkConfig::from_env()?;
    config.validate_strict()?;
    init_logging(&config.logging)?;

    let mut server = ServerEndpoint::with_config(&config, Pinger::default());
    server.start()?;

    loop {
        let handled = server.update(Some(64));

        let relay = match server.handler().chat.lock() {
            Ok(mut chat) => std::mem::take(&mut *chat),
            Err(_) => Vec::new(),
        };
        for (source, message) in relay {
            server.message_all_clients(&message, Some(source));
        }

        if handled == 0 {
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}
