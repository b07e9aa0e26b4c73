//! UDP channel against plain loopback sockets.
//!
//! Timing-sensitive cases run serially so the heartbeat threads do not
//! compete for CPU with each other.
//!
//! # Running with tracing
//!
//! ```bash
//! RUST_LOG=tether=debug cargo test --features tracing --test udp -- --nocapture
//! ```

use std::net::UdpSocket;
use std::sync::Once;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use serial_test::serial;

use tether::udp::{HEARTBEAT_PROBE, UdpConfig, UdpConnection};

static INIT_TRACING: Once = Once::new();

fn init_test_tracing() {
    INIT_TRACING.call_once(|| {
        tether::init_tracing();
    });
}

const WAIT: Duration = Duration::from_secs(5);

/// Loopback socket standing in for the remote peer.
fn observer() -> (UdpSocket, u16) {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("bind observer");
    socket
        .set_read_timeout(Some(Duration::from_millis(100)))
        .expect("read timeout");
    let port = socket.local_addr().expect("local addr").port();
    (socket, port)
}

/// Opens a connection on an ephemeral port aimed at `peer_port`, with
/// heartbeats effectively disabled.
fn open_quiet(peer_port: u16) -> (UdpConnection, Receiver<String>) {
    let (tx, rx) = mpsc::channel();
    let conn = UdpConfig::new(0, "127.0.0.1")
        .peer_port(peer_port)
        .heartbeat_interval(Duration::from_secs(60))
        .idle_timeout(Duration::from_secs(120))
        .pool_multiplier(1)
        .on_message(move |text| {
            let _ = tx.send(text.to_owned());
        })
        .open()
        .expect("open");
    (conn, rx)
}

fn send_to_conn(observer: &UdpSocket, conn: &UdpConnection, payload: &[u8]) {
    observer
        .send_to(payload, ("127.0.0.1", conn.local_addr().port()))
        .expect("send to connection");
}

/// Reads datagrams until one matches `want` or the wait expires.
fn recv_matching(socket: &UdpSocket, want: &str, wait: Duration) -> bool {
    let deadline = Instant::now() + wait;
    let mut buf = [0u8; 1500];
    while Instant::now() < deadline {
        if let Ok((n, _)) = socket.recv_from(&mut buf)
            && &buf[..n] == want.as_bytes()
        {
            return true;
        }
    }
    false
}

#[test]
fn inbound_datagrams_are_delivered_as_text() {
    init_test_tracing();
    let (peer, peer_port) = observer();
    let (conn, rx) = open_quiet(peer_port);

    send_to_conn(&peer, &conn, b"hello");
    send_to_conn(&peer, &conn, "gr\u{fc}\u{df}e".as_bytes());

    assert_eq!(rx.recv_timeout(WAIT).expect("first"), "hello");
    assert_eq!(rx.recv_timeout(WAIT).expect("second"), "gr\u{fc}\u{df}e");
}

#[test]
fn invalid_utf8_is_replaced_not_dropped() {
    init_test_tracing();
    let (peer, peer_port) = observer();
    let (conn, rx) = open_quiet(peer_port);

    send_to_conn(&peer, &conn, &[b'o', b'k', 0xff]);
    assert_eq!(rx.recv_timeout(WAIT).expect("delivered"), "ok\u{fffd}");
}

#[test]
fn empty_datagram_is_skipped_and_buffer_recovers() {
    init_test_tracing();
    let (peer, peer_port) = observer();
    let (conn, rx) = open_quiet(peer_port);

    send_to_conn(&peer, &conn, b"");
    send_to_conn(&peer, &conn, b"after-empty");

    assert_eq!(rx.recv_timeout(WAIT).expect("delivered"), "after-empty");
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn short_datagram_does_not_truncate_the_next() {
    init_test_tracing();
    let (peer, peer_port) = observer();
    let (conn, rx) = open_quiet(peer_port);

    send_to_conn(&peer, &conn, b"ab");
    send_to_conn(&peer, &conn, b"a much longer datagram");

    assert_eq!(rx.recv_timeout(WAIT).expect("short"), "ab");
    assert_eq!(rx.recv_timeout(WAIT).expect("long"), "a much longer datagram");
}

#[test]
fn oversized_datagram_is_truncated_to_buffer() {
    init_test_tracing();
    let (peer, peer_port) = observer();
    let (tx, rx) = mpsc::channel();
    let conn = UdpConfig::new(0, "127.0.0.1")
        .peer_port(peer_port)
        .receive_buffer(4)
        .pool_multiplier(1)
        .on_message(move |text| {
            let _ = tx.send(text.to_owned());
        })
        .open()
        .expect("open");

    send_to_conn(&peer, &conn, b"abcdefgh");
    assert_eq!(rx.recv_timeout(WAIT).expect("delivered"), "abcd");
}

#[test]
fn outbound_send_reaches_peer() {
    init_test_tracing();
    let (peer, peer_port) = observer();
    let (conn, _rx) = open_quiet(peer_port);

    assert!(conn.send("ping"));
    assert!(recv_matching(&peer, "ping", WAIT));
}

#[test]
#[serial]
fn quiet_peer_receives_heartbeat_probe() {
    init_test_tracing();
    let (peer, peer_port) = observer();
    let _conn = UdpConfig::new(0, "127.0.0.1")
        .peer_port(peer_port)
        .heartbeat_interval(Duration::from_millis(100))
        .idle_timeout(Duration::from_secs(10))
        .tick(Duration::from_millis(20))
        .pool_multiplier(1)
        .open()
        .expect("open");

    assert!(recv_matching(&peer, HEARTBEAT_PROBE, WAIT));
}

#[test]
#[serial]
fn silent_peer_is_reported_once_per_idle_window() {
    init_test_tracing();
    let (_peer, peer_port) = observer();
    let (tx, rx) = mpsc::channel();
    let started = Instant::now();
    let mut conn = UdpConfig::new(0, "127.0.0.1")
        .peer_port(peer_port)
        .heartbeat_interval(Duration::from_millis(50))
        .idle_timeout(Duration::from_millis(200))
        .tick(Duration::from_millis(10))
        .pool_multiplier(1)
        .on_peer_silent(move || {
            let _ = tx.send(Instant::now());
        })
        .open()
        .expect("open");

    let first = rx.recv_timeout(WAIT).expect("first silence");
    let second = rx.recv_timeout(WAIT).expect("second silence");
    conn.stop();

    assert!(first.duration_since(started) >= Duration::from_millis(200));
    // The idle window restarts after each report.
    assert!(second.duration_since(first) >= Duration::from_millis(150));
    assert!(!conn.send("x"));
}

/// A port that was free a moment ago.
fn free_port() -> u16 {
    let socket = UdpSocket::bind("0.0.0.0:0").expect("bind scratch socket");
    socket.local_addr().expect("local addr").port()
}

#[test]
#[serial]
fn self_addressed_link_still_reports_silence() {
    init_test_tracing();
    let port = free_port();
    let (msg_tx, msg_rx) = mpsc::channel();
    let (silent_tx, silent_rx) = mpsc::channel();
    let started = Instant::now();
    // Peer is ourselves: every probe loops back to this socket.
    let _conn = UdpConfig::new(port, "127.0.0.1")
        .idle_timeout(Duration::from_secs(2))
        .heartbeat_interval(Duration::from_secs(1))
        .on_message(move |text| {
            let _ = msg_tx.send((Instant::now(), text.to_owned()));
        })
        .on_peer_silent(move || {
            let _ = silent_tx.send(Instant::now());
        })
        .open()
        .expect("open");

    let (probe_at, probe) = msg_rx.recv_timeout(WAIT).expect("looped-back probe");
    assert_eq!(probe, HEARTBEAT_PROBE);
    assert!(probe_at.duration_since(started) >= Duration::from_secs(1));

    let silent_at = silent_rx.recv_timeout(WAIT).expect("silence despite own probes");
    let elapsed = silent_at.duration_since(started);
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(4));
}

#[test]
#[serial]
fn traffic_keeps_peer_alive() {
    init_test_tracing();
    let (peer, peer_port) = observer();
    let (tx, rx) = mpsc::channel();
    let conn = UdpConfig::new(0, "127.0.0.1")
        .peer_port(peer_port)
        .heartbeat_interval(Duration::from_millis(100))
        .idle_timeout(Duration::from_millis(300))
        .tick(Duration::from_millis(10))
        .pool_multiplier(1)
        .on_peer_silent(move || {
            let _ = tx.send(());
        })
        .open()
        .expect("open");

    let until = Instant::now() + Duration::from_millis(900);
    while Instant::now() < until {
        send_to_conn(&peer, &conn, b"keepalive");
        thread::sleep(Duration::from_millis(50));
    }
    assert!(rx.try_recv().is_err());
    assert!(conn.idle_for() < Duration::from_millis(300));
}

#[test]
fn stop_is_idempotent_and_disables_send() {
    init_test_tracing();
    let (_peer, peer_port) = observer();
    let (mut conn, _rx) = open_quiet(peer_port);
    assert!(conn.is_running());

    conn.stop();
    conn.stop();
    assert!(!conn.is_running());
    assert!(!conn.send("dropped"));
    assert!(!conn.send_bytes(vec![1, 2, 3]));
}

#[test]
fn stopped_connection_ignores_inbound() {
    init_test_tracing();
    let (peer, peer_port) = observer();
    let (mut conn, rx) = open_quiet(peer_port);
    let port = conn.local_addr().port();
    conn.stop();

    let _ = peer.send_to(b"late", ("127.0.0.1", port));
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn port_is_free_again_after_stop() {
    init_test_tracing();
    let (_peer, peer_port) = observer();
    let (mut conn, _rx) = open_quiet(peer_port);
    let port = conn.local_addr().port();
    conn.stop();
    drop(conn);

    let mut reopened = UdpConfig::new(port, "127.0.0.1")
        .peer_port(peer_port)
        .pool_multiplier(1)
        .open()
        .expect("rebind after stop");
    assert_eq!(reopened.local_addr().port(), port);
    reopened.stop();
}
