use parking_lot::Mutex;
use relay_session::{ConnectionEvent, ConnectionManager, ManagerConfig, P2pError, PeerId};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

type EventLog = Arc<Mutex<Vec<(PeerId, ConnectionEvent)>>>;

fn manager() -> ConnectionManager {
    let mut m = ConnectionManager::new(ManagerConfig::default());
    m.initialize().unwrap();
    m
}

fn record_events(m: &mut ConnectionManager) -> EventLog {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    m.set_connection_callback(move |peer, event| sink.lock().push((peer, event)));
    log
}

fn pump_until<F>(a: &mut ConnectionManager, b: &mut ConnectionManager, mut done: F) -> bool
where
    F: FnMut(&ConnectionManager, &ConnectionManager) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        a.process_events();
        b.process_events();
        if done(&*a, &*b) {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

/// Listener `server`, connected `client`; returns (server-side peer, client-side peer).
fn connected_pair(server: &mut ConnectionManager, client: &mut ConnectionManager) -> (PeerId, PeerId) {
    let port = server.listen(0).unwrap().port();
    let client_peer = client.connect("127.0.0.1", port).unwrap();
    assert!(pump_until(server, client, |s, _| s.connected_peers(8).len() == 1));
    let server_peer = server.connected_peers(8)[0];
    (server_peer, client_peer)
}

#[test]
fn test_loopback_send_and_receive() {
    let mut server = manager();
    let mut client = manager();
    let server_log = record_events(&mut server);
    let client_log = record_events(&mut client);

    let (server_peer, client_peer) = connected_pair(&mut server, &mut client);
    assert_eq!(client_peer, PeerId(1));
    assert_eq!(client_log.lock().as_slice(), &[(client_peer, ConnectionEvent::Connected)]);
    assert_eq!(server_log.lock().as_slice(), &[(server_peer, ConnectionEvent::Connected)]);

    client.send_packet(client_peer, b"hello").unwrap();
    client.send_packet(client_peer, b"world!").unwrap();
    assert!(pump_until(&mut server, &mut client, |s, _| {
        s.receive_queue(server_peer).map_or(0, |q| q.len()) == 2
    }));

    assert_eq!(server.is_packet_available(PeerId::ANY), Ok(Some((5, server_peer))));
    let (first, from) = server.read_packet(PeerId::ANY, 64).unwrap();
    assert_eq!((&first[..], from), (&b"hello"[..], server_peer));
    let (second, _) = server.read_packet(server_peer, 64).unwrap();
    assert_eq!(&second[..], b"world!");
    assert_eq!(server.read_packet(server_peer, 64), Err(P2pError::NoPacket));

    server.send_packet(server_peer, b"reply").unwrap();
    assert!(pump_until(&mut server, &mut client, |_, c| {
        c.is_packet_available(client_peer).unwrap().is_some()
    }));
    let (reply, _) = client.read_packet(client_peer, 5).unwrap();
    assert_eq!(&reply[..], b"reply");
}

#[test]
fn test_large_packets_keep_order() {
    let mut server = manager();
    let mut client = manager();
    let (server_peer, client_peer) = connected_pair(&mut server, &mut client);

    let packets: Vec<Vec<u8>> = (0..8u8).map(|i| vec![i; 256 * 1024]).collect();
    for p in &packets {
        client.send_packet(client_peer, p).unwrap();
    }

    let mut received = Vec::new();
    let done = pump_until(&mut server, &mut client, |s, _| {
        if let Some(q) = s.receive_queue(server_peer) {
            received.extend(q.drain());
        }
        received.len() == packets.len()
    });
    assert!(done);
    for (got, want) in received.iter().zip(&packets) {
        assert_eq!(&got[..], &want[..]);
    }
}

#[test]
fn test_connect_to_closed_port_fails_within_timeout() {
    let port = {
        let mut probe = manager();
        probe.listen(0).unwrap().port()
    };

    let mut client = ConnectionManager::new(ManagerConfig {
        connect_timeout: Duration::from_millis(2000),
        ..ManagerConfig::default()
    });
    client.initialize().unwrap();

    let start = Instant::now();
    assert_eq!(client.connect("127.0.0.1", port), Err(P2pError::ConnectionFailed));
    assert!(start.elapsed() < Duration::from_millis(2000) + Duration::from_secs(1));
    assert_eq!(client.peer_count(), 0);
}

#[test]
fn test_disconnect_notifies_both_sides() {
    let mut server = manager();
    let mut client = manager();
    let server_log = record_events(&mut server);
    let client_log = record_events(&mut client);
    let (server_peer, client_peer) = connected_pair(&mut server, &mut client);

    client.disconnect(client_peer).unwrap();
    assert_eq!(client.peer_count(), 0);
    assert_eq!(
        client_log.lock().last(),
        Some(&(client_peer, ConnectionEvent::Disconnected))
    );
    assert_eq!(client.disconnect(client_peer), Err(P2pError::InvalidPeer));
    assert_eq!(client.send_packet(client_peer, b"x"), Err(P2pError::InvalidPeer));

    assert!(pump_until(&mut server, &mut client, |s, _| s.peer_count() == 0));
    assert_eq!(
        server_log.lock().last(),
        Some(&(server_peer, ConnectionEvent::Disconnected))
    );
}

#[test]
fn test_oversize_read_loses_packet() {
    let mut server = manager();
    let mut client = manager();
    let (server_peer, client_peer) = connected_pair(&mut server, &mut client);

    client.send_packet(client_peer, &[7u8; 32]).unwrap();
    client.send_packet(client_peer, b"next").unwrap();
    assert!(pump_until(&mut server, &mut client, |s, _| {
        s.receive_queue(server_peer).map_or(0, |q| q.len()) == 2
    }));

    assert_eq!(
        server.read_packet(server_peer, 16),
        Err(P2pError::BufferTooSmall { needed: 32, capacity: 16 })
    );
    let (packet, _) = server.read_packet(server_peer, 16).unwrap();
    assert_eq!(&packet[..], b"next");
}

#[test]
fn test_queue_drained_from_another_thread() {
    let mut server = manager();
    let mut client = manager();
    let (server_peer, client_peer) = connected_pair(&mut server, &mut client);

    let queue = server.receive_queue(server_peer).unwrap();
    let consumer = thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut got = Vec::new();
        while got.len() < 50 && Instant::now() < deadline {
            match queue.pop() {
                Some(p) => got.push(p[0]),
                None => thread::sleep(Duration::from_millis(1)),
            }
        }
        got
    });

    for i in 0..50u8 {
        client.send_packet(client_peer, &[i, 0xEE]).unwrap();
    }
    let deadline = Instant::now() + Duration::from_secs(5);
    while !consumer.is_finished() && Instant::now() < deadline {
        server.process_events();
        client.process_events();
        thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(consumer.join().unwrap(), (0..50).collect::<Vec<u8>>());
}

#[test]
fn test_auto_reconnect_after_listener_returns() {
    let mut server = manager();
    let mut client = manager();
    let client_log = record_events(&mut client);
    let (server_peer, client_peer) = connected_pair(&mut server, &mut client);
    let port = server.listen_addr().unwrap().port();

    client.set_auto_reconnect(client_peer, true, 50, 200).unwrap();
    assert_eq!(
        client.set_auto_reconnect(client_peer, true, 0, 200),
        Err(P2pError::InvalidParam)
    );
    assert_eq!(
        client.set_auto_reconnect(client_peer, true, 300, 200),
        Err(P2pError::InvalidParam)
    );

    // Drop the server side and stop accepting.
    server.stop_listen();
    server.disconnect(server_peer).unwrap();
    assert!(pump_until(&mut server, &mut client, |_, c| c.connected_peers(8).is_empty()));
    assert_eq!(client.peer_count(), 1, "peer retained while waiting to reconnect");
    assert_eq!(client.send_packet(client_peer, b"x"), Err(P2pError::SendFailed));

    // Bring the listener back on the same port; the client finds it again.
    server.listen(port).unwrap();
    assert!(pump_until(&mut server, &mut client, |s, c| {
        c.connected_peers(8) == vec![client_peer] && s.connected_peers(8).len() == 1
    }));

    let events = client_log.lock().clone();
    assert_eq!(
        events,
        vec![
            (client_peer, ConnectionEvent::Connected),
            (client_peer, ConnectionEvent::Disconnected),
            (client_peer, ConnectionEvent::Connected),
        ]
    );

    client.send_packet(client_peer, b"again").unwrap();
    assert!(pump_until(&mut server, &mut client, |s, _| {
        s.is_packet_available(PeerId::ANY).unwrap().is_some()
    }));
    let (packet, _) = server.read_packet(PeerId::ANY, 64).unwrap();
    assert_eq!(&packet[..], b"again");
}

#[test]
fn test_disarm_while_waiting_removes_peer() {
    let mut server = manager();
    let mut client = manager();
    let (server_peer, client_peer) = connected_pair(&mut server, &mut client);

    client.set_auto_reconnect(client_peer, true, 5_000, 10_000).unwrap();
    server.stop_listen();
    server.disconnect(server_peer).unwrap();
    assert!(pump_until(&mut server, &mut client, |_, c| c.connected_peers(8).is_empty()));
    assert_eq!(client.peer_count(), 1);

    client.set_auto_reconnect(client_peer, false, 0, 0).unwrap();
    assert_eq!(client.peer_count(), 0);
}

#[test]
fn test_shutdown_fires_no_callbacks() {
    let mut server = manager();
    let mut client = manager();
    let client_log = record_events(&mut client);
    connected_pair(&mut server, &mut client);

    let before = client_log.lock().len();
    client.shutdown();
    assert_eq!(client_log.lock().len(), before);
    assert_eq!(client.peer_count(), 0);
    assert!(!client.is_initialized());
}

#[test]
fn test_corrupt_length_keeps_connection() {
    use std::io::Write;

    let mut server = manager();
    let port = server.listen(0).unwrap().port();
    let mut raw = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
    raw.set_nodelay(true).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while server.connected_peers(8).is_empty() && Instant::now() < deadline {
        server.process_events();
        thread::sleep(Duration::from_millis(2));
    }
    let peer = server.connected_peers(8)[0];

    // A zero length prefix, read and discarded on its own.
    raw.write_all(&[0, 0, 0, 0]).unwrap();
    for _ in 0..50 {
        server.process_events();
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(server.connected_peers(8), vec![peer]);
    assert_eq!(server.is_packet_available(peer), Ok(None));

    raw.write_all(&[2, 0, 0, 0, b'o', b'k']).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while server.is_packet_available(peer) == Ok(None) && Instant::now() < deadline {
        server.process_events();
        thread::sleep(Duration::from_millis(2));
    }

    let (packet, from) = server.read_packet(PeerId::ANY, 16).unwrap();
    assert_eq!((&packet[..], from), (&b"ok"[..], peer));
    assert_eq!(server.connected_peers(8), vec![peer]);
}
