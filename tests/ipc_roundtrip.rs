//! Integration tests for the helper control protocol.
//!
//! Runs a real `IpcServer` on an ephemeral loopback port in front of a
//! `SessionManager` backed by a local TCP login server.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tunlink::error::IpcError;
use tunlink::ipc::{self, Command, IpcClient, IpcServer, Request};
use tunlink::session::{RetryPolicy, SessionManager};
use tunlink::state::{StateKind, Status};
use tunlink::vpn::{ChannelTunnel, TcpHandshaker, TrafficFeed};

// =============================================================================
// Test Infrastructure
// =============================================================================

/// Login server that accepts every token once per connection.
fn spawn_login_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            let mut line = String::new();
            if BufReader::new(&stream).read_line(&mut line).is_err() {
                continue;
            }
            let reply = serde_json::json!({
                "type": "login_response",
                "status": "success",
                "assigned_vip": "10.0.0.42",
                "subnet_mask": "255.255.255.0",
                "server_vip": "10.0.0.1",
                "server_version": "0.1.7",
            });
            let _ = writeln!(&stream, "{reply}");
        }
    });
    addr
}

struct Helper {
    addr: String,
    secret: String,
    _feed: TrafficFeed,
}

fn spawn_helper(log_file: Option<std::path::PathBuf>) -> Helper {
    spawn_configured(|server| server.with_log_file(log_file))
}

fn spawn_configured(configure: impl FnOnce(IpcServer) -> IpcServer) -> Helper {
    let (tunnel, feed) = ChannelTunnel::new();
    let manager = SessionManager::new(Arc::new(TcpHandshaker::new("0.1.0")), Arc::new(tunnel))
        .with_retry_policy(RetryPolicy::new().max_attempts(1))
        .with_handshake_timeout(Duration::from_secs(2));
    let secret = ipc::generate_secret();

    let server = configure(
        IpcServer::bind("127.0.0.1:0", Arc::new(manager), Some(secret.clone())).unwrap(),
    );
    let addr = server.local_addr().unwrap().to_string();
    server.spawn().unwrap();

    Helper {
        addr,
        secret,
        _feed: feed,
    }
}

fn wait_for_state(client: &IpcClient, want: StateKind) -> Status {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let status = client.status().unwrap();
        if status.kind() == want {
            return status;
        }
        assert!(Instant::now() < deadline, "stuck in {status:?}, wanted {want}");
        thread::sleep(Duration::from_millis(10));
    }
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn connect_status_stats_disconnect() {
    let login = spawn_login_server();
    let helper = spawn_helper(None);
    let client = IpcClient::new(helper.addr.clone(), Some(helper.secret.clone()));

    assert_eq!(client.status().unwrap(), Status::Disconnected);
    assert_eq!(client.connect(&login, "abc123").unwrap(), "Connecting...");

    let status = wait_for_state(&client, StateKind::Connected);
    assert_eq!(status.assigned_vip(), Some("10.0.0.42"));
    assert_eq!(status.server().map(|s| s.server_version.as_str()), Some("0.1.7"));

    let stats = client.stats().unwrap();
    assert_eq!((stats.bytes_sent, stats.bytes_recv), (0, 0));

    let err = client.connect(&login, "abc123").unwrap_err();
    assert!(matches!(err, IpcError::Remote(ref m) if m == "already connected"));

    assert_eq!(client.disconnect().unwrap(), "Disconnected");
    assert_eq!(client.status().unwrap(), Status::Disconnected);
}

#[test]
fn wrong_secret_is_unauthorized() {
    let helper = spawn_helper(None);

    for secret in [None, Some("0".repeat(64))] {
        let client = IpcClient::new(helper.addr.clone(), secret);
        let err = client.status().unwrap_err();
        assert!(matches!(err, IpcError::Remote(ref m) if m == "unauthorized: invalid IPC secret"));
    }
}

#[test]
fn empty_token_is_reported_to_the_controller() {
    let helper = spawn_helper(None);
    let client = IpcClient::new(helper.addr.clone(), Some(helper.secret.clone()));

    let err = client.connect("vpn.example:443", "").unwrap_err();
    assert!(matches!(err, IpcError::Remote(ref m) if m.contains("token")));
    assert_eq!(client.status().unwrap(), Status::Disconnected);
}

#[test]
fn logs_return_the_file_tail() {
    let path = std::env::temp_dir().join(format!("tunlink-ipc-logs-{}.log", std::process::id()));
    std::fs::write(&path, "first\nsecond\nthird\n").unwrap();

    let helper = spawn_helper(Some(path.clone()));
    let client = IpcClient::new(helper.addr.clone(), Some(helper.secret.clone()));
    assert_eq!(client.logs().unwrap(), "first\nsecond\nthird");

    let _ = std::fs::remove_file(&path);
}

#[test]
fn malformed_request_gets_an_error_response() {
    let helper = spawn_helper(None);
    let stream = std::net::TcpStream::connect(&helper.addr).unwrap();
    writeln!(&stream, "{{\"command\":\"reboot\"}}").unwrap();

    let mut line = String::new();
    BufReader::new(&stream).read_line(&mut line).unwrap();
    let resp: tunlink::ipc::Response = serde_json::from_str(&line).unwrap();
    assert!(!resp.is_success());
    assert!(resp.message.unwrap().starts_with("invalid request"));

    // Sanity check: well-formed requests still go through on a new connection.
    let client = IpcClient::new(helper.addr.clone(), Some(helper.secret.clone()));
    assert!(client.send(Request::new(Command::GetStats)).unwrap().is_success());
}

#[test]
fn connections_beyond_the_limit_are_turned_away() {
    let helper = spawn_configured(|server| server.with_max_connections(2));
    let client = IpcClient::new(helper.addr.clone(), Some(helper.secret.clone()));

    // Two silent connections occupy both handler slots.
    let held: Vec<TcpStream> = (0..2)
        .map(|_| TcpStream::connect(&helper.addr).unwrap())
        .collect();
    assert!(client.status().is_err());

    drop(held);
    let deadline = Instant::now() + Duration::from_secs(5);
    while client.status().is_err() {
        assert!(Instant::now() < deadline, "slots were never released");
        thread::sleep(Duration::from_millis(20));
    }
}
