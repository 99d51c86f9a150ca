//! Example: Ping client
//!
//! Sends a `Ping` and prints the number that comes back.
//!
//! Run with: `cargo run --example ping_client -- 127.0.0.1 60000`

use std::time::{Duration, Instant};

use framewire::config::NetworkConfig;
use framewire::core::message::Message;
use framewire::message_kind;
use framewire::service::ClientEndpoint;
use framewire::utils::logging::init_logging;

message_kind! {
    pub enum Kind: u32 {
        Ping = 0,
        Pong = 1,
        Chat = 2,
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port = match args.next() {
        Some(port) => port.parse()?,
        None => framewire::config::DEFAULT_PORT,
    };

    let config = NetworkConfig::from_env()?;
    init_logging(&config.logging)?;

    let mut client = ClientEndpoint::<Kind>::with_config(&config);
    client.connect(&host, port)?;

    let sent_at = Instant::now();
    client.send(Message::new(Kind::Ping))?;

    let deadline = sent_at + Duration::from_secs(5);
    while Instant::now() < deadline {
        if let Some(mut reply) = client.incoming().pop_front() {
            if reply.message.kind() == Kind::Pong {
                let value: u32 = reply.message.pop()?;
                println!("pong {value} after {:?}", sent_at.elapsed());
                break;
            }
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    client.disconnect();
    Ok(())
}
