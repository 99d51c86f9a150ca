//! End-to-end tests for client and server endpoints over loopback

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use framewire::config::NetworkConfig;
use framewire::core::message::{ConnectionId, Message, OwnedMessage};
use framewire::message_kind;
use framewire::service::{ClientEndpoint, ServerEndpoint, ServerHandler};
use framewire::transport::Connection;

message_kind! {
    enum Kind: u32 {
        Ping = 0,
        Pong = 1,
        Count = 2,
        Broadcast = 3,
    }
}

#[derive(Default)]
struct Recorder {
    refuse: bool,
    received: Mutex<Vec<(Option<ConnectionId>, Message<Kind>)>>,
    disconnected: Mutex<Vec<ConnectionId>>,
    admitted: AtomicUsize,
}

impl ServerHandler<Kind> for Recorder {
    fn on_client_connect(&self, _connection: &Arc<Connection<Kind>>) -> bool {
        self.admitted.fetch_add(1, Ordering::SeqCst);
        !self.refuse
    }

    fn on_client_disconnect(&self, connection: &Arc<Connection<Kind>>) {
        self.disconnected.lock().unwrap().push(connection.id());
    }

    fn on_message(&self, connection: Option<&Arc<Connection<Kind>>>, message: Message<Kind>) {
        if let (Kind::Ping, Some(connection)) = (message.kind(), connection) {
            let mut pong = Message::new(Kind::Pong);
            pong.push(15u32).unwrap();
            connection.send(pong);
        }
        self.received
            .lock()
            .unwrap()
            .push((connection.map(|c| c.id()), message));
    }
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn start_server(handler: Recorder) -> (ServerEndpoint<Kind, Recorder>, u16) {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.server.address = "127.0.0.1:0".to_string();
    });
    let mut server = ServerEndpoint::with_config(&config, handler);
    server.start().unwrap();
    let port = server.local_addr().unwrap().port();
    (server, port)
}

fn connect(port: u16) -> ClientEndpoint<Kind> {
    let mut client = ClientEndpoint::new();
    client.connect("127.0.0.1", port).unwrap();
    client
}

/// Connect and wait until the server has pooled the client
fn admit(server: &ServerEndpoint<Kind, Recorder>, port: u16) -> ClientEndpoint<Kind> {
    let expected = server.connection_count() + 1;
    let client = connect(port);
    assert!(wait_for(|| server.connection_count() == expected));
    client
}

fn next_message(client: &ClientEndpoint<Kind>) -> Option<OwnedMessage<Kind>> {
    let mut received = None;
    wait_for(|| {
        received = client.incoming().pop_front();
        received.is_some()
    });
    received
}

fn pump(server: &ServerEndpoint<Kind, Recorder>, total: usize) -> bool {
    wait_for(|| {
        server.update(None);
        server.handler().received.lock().unwrap().len() >= total
    })
}

#[test]
fn test_ping_gets_pong() {
    let (server, port) = start_server(Recorder::default());
    let client = admit(&server, port);

    client.send(Message::new(Kind::Ping)).unwrap();
    assert!(pump(&server, 1));

    let mut reply = next_message(&client).expect("no reply").message;
    assert_eq!(reply.kind(), Kind::Pong);
    assert_eq!(reply.header().body_size, 4);
    assert_eq!(reply.pop::<u32>().unwrap(), 15);

    let received = server.handler().received.lock().unwrap();
    assert_eq!(received[0].0, Some(10_000));
}

#[test]
fn test_connection_ids_count_up_from_first_id() {
    let (server, port) = start_server(Recorder::default());
    let _first = admit(&server, port);
    let _second = admit(&server, port);

    assert!(wait_for(|| server
        .connections()
        .iter()
        .all(|c| c.is_connected())));
    let ids: Vec<_> = server.connections().iter().map(|c| c.id()).collect();
    assert_eq!(ids, vec![10_000, 10_001]);
    assert_eq!(server.metrics().snapshot().connections_active, 2);
}

#[test]
fn test_broadcast_skips_ignored_client() {
    let (server, port) = start_server(Recorder::default());
    let clients: Vec<_> = (0..3).map(|_| admit(&server, port)).collect();
    assert!(wait_for(|| server
        .connections()
        .iter()
        .all(|c| c.is_connected())));

    let mut broadcast = Message::new(Kind::Broadcast);
    broadcast.push(99u16).unwrap();
    server.message_all_clients(&broadcast, Some(10_000));

    for client in &clients[1..] {
        let received = next_message(client).expect("broadcast not delivered");
        assert_eq!(received.source, None);
        assert_eq!(received.message, broadcast);
    }

    std::thread::sleep(Duration::from_millis(100));
    assert!(clients[0].incoming().is_empty());
    assert!(server.handler().disconnected.lock().unwrap().is_empty());
}

#[test]
fn test_dead_clients_are_evicted_in_order() {
    let (server, port) = start_server(Recorder::default());
    let first = admit(&server, port);
    let mut second = admit(&server, port);
    let third = admit(&server, port);

    second.disconnect();
    assert!(wait_for(|| !server.connections()[1].is_connected()));

    server.message_all_clients(&Message::new(Kind::Broadcast), None);

    assert_eq!(*server.handler().disconnected.lock().unwrap(), vec![10_001]);
    let ids: Vec<_> = server.connections().iter().map(|c| c.id()).collect();
    assert_eq!(ids, vec![10_000, 10_002]);

    assert!(next_message(&first).is_some());
    assert!(next_message(&third).is_some());
}

#[test]
fn test_message_client_evicts_dead_connection() {
    let (server, port) = start_server(Recorder::default());
    let mut client = admit(&server, port);
    let connection = server.connections()[0].clone();
    assert!(wait_for(|| connection.is_connected()));

    client.disconnect();
    assert!(wait_for(|| !connection.is_connected()));

    server.message_client(&connection, Message::new(Kind::Pong));
    assert_eq!(server.connection_count(), 0);
    assert_eq!(*server.handler().disconnected.lock().unwrap(), vec![10_000]);
}

#[test]
fn test_messages_arrive_in_send_order() {
    let (server, port) = start_server(Recorder::default());
    let client = admit(&server, port);

    for i in 0..200u32 {
        let mut message = Message::new(Kind::Count);
        message.push(i).unwrap();
        client.send(message).unwrap();
    }
    assert!(pump(&server, 200));

    let received = server.handler().received.lock().unwrap();
    let values: Vec<u32> = received
        .iter()
        .map(|(_, m)| m.clone().pop::<u32>().unwrap())
        .collect();
    assert_eq!(values, (0..200).collect::<Vec<_>>());
}

#[test]
fn test_sends_from_many_threads_are_all_delivered() {
    const THREADS: u32 = 4;
    const PER_THREAD: u32 = 250;

    let (server, port) = start_server(Recorder::default());
    let client = admit(&server, port);

    std::thread::scope(|scope| {
        for thread in 0..THREADS {
            let client = &client;
            scope.spawn(move || {
                for seq in 0..PER_THREAD {
                    let mut message = Message::new(Kind::Count);
                    message.push(thread).unwrap().push(seq).unwrap();
                    client.send(message).unwrap();
                }
            });
        }
    });

    let total = (THREADS * PER_THREAD) as usize;
    assert!(pump(&server, total));
    std::thread::sleep(Duration::from_millis(50));
    server.update(None);

    let received = server.handler().received.lock().unwrap();
    assert_eq!(received.len(), total);

    // every frame intact, per-thread order preserved
    let mut next_seq = vec![0u32; THREADS as usize];
    for (_, message) in received.iter() {
        let mut message = message.clone();
        assert_eq!(message.body().len(), 8);
        let seq: u32 = message.pop().unwrap();
        let thread: u32 = message.pop().unwrap();
        assert_eq!(seq, next_seq[thread as usize]);
        next_seq[thread as usize] += 1;
    }
}

#[test]
fn test_refused_client_is_closed() {
    let (server, port) = start_server(Recorder {
        refuse: true,
        ..Recorder::default()
    });

    let client = connect(port);
    assert!(wait_for(|| server.handler().admitted.load(Ordering::SeqCst) == 1));
    assert!(wait_for(|| !client.is_connected()));

    assert_eq!(server.connection_count(), 0);
    assert_eq!(server.metrics().snapshot().connections_rejected, 1);
}

#[test]
fn test_message_from_evicted_client_has_no_connection() {
    let (server, port) = start_server(Recorder::default());
    let mut client = admit(&server, port);

    client.send(Message::new(Kind::Count)).unwrap();
    assert!(wait_for(|| server.incoming().count() == 1));

    client.disconnect();
    assert!(wait_for(|| !server.connections()[0].is_connected()));
    server.message_all_clients(&Message::new(Kind::Broadcast), None);
    assert_eq!(server.connection_count(), 0);

    assert_eq!(server.update(None), 1);
    let received = server.handler().received.lock().unwrap();
    assert_eq!(received[0].0, None);
    assert_eq!(received[0].1.kind(), Kind::Count);
}

#[test]
fn test_update_respects_limit() {
    let (server, port) = start_server(Recorder::default());
    let client = admit(&server, port);

    for _ in 0..5 {
        client.send(Message::new(Kind::Count)).unwrap();
    }
    assert!(wait_for(|| server.incoming().count() == 5));

    assert_eq!(server.update(Some(2)), 2);
    assert_eq!(server.incoming().count(), 3);
    assert_eq!(server.update(None), 3);
}

#[test]
fn test_stop_closes_clients() {
    let (mut server, port) = start_server(Recorder::default());
    let client = admit(&server, port);
    assert!(wait_for(|| client.is_connected()));

    server.stop();
    assert!(wait_for(|| !client.is_connected()));
    assert!(server
        .connections()
        .iter()
        .all(|c| !c.is_connected()));
}
