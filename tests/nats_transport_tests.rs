// Integration tests for the NATS transport without a server
//
// Nothing listens on port 1, so every handshake is refused. The link logs each
// state change, and the captured thread names show which thread wrote it.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use voice_assistant::bus::{pending_ack, BusLink, BusTransport, ConnectionState, NatsTransport};
use voice_assistant::config::{BusConfig, TransportKind};

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn lines_containing(&self, needle: &str) -> Vec<String> {
        let bytes = self.0.lock().unwrap();
        String::from_utf8_lossy(&bytes)
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_string)
            .collect()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn captured_logs() -> CapturedLogs {
    static LOGS: OnceLock<CapturedLogs> = OnceLock::new();
    LOGS.get_or_init(|| {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_thread_names(true)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .init();
        logs
    })
    .clone()
}

fn unreachable_config() -> BusConfig {
    BusConfig {
        transport: TransportKind::Nats,
        host: "127.0.0.1".to_string(),
        port: 1,
        username: None,
        password: None,
        base_topic: "assistant".to_string(),
        default_qos: Default::default(),
        connect_timeout_ms: 1000,
        publish_timeout_ms: 1000,
        disconnect_grace_ms: 250,
        subscribe_poll_ms: 20,
    }
}

fn wait_for_log(logs: &CapturedLogs, needle: &str) -> Vec<String> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let lines = logs.lines_containing(needle);
        if !lines.is_empty() || Instant::now() > deadline {
            return lines;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_state_changes_come_from_network_thread() {
    let logs = captured_logs();
    let transport = NatsTransport::new(&unreachable_config()).unwrap();
    let link = BusLink::new();

    transport.open(Arc::clone(&link)).unwrap();

    let started = wait_for_log(&logs, "Broker handshake started");
    assert_eq!(started.len(), 1);
    assert!(started[0].contains("bus-net"), "handshake start reported off the network thread: {}", started[0]);

    let refused = wait_for_log(&logs, "Broker rejected connection");
    assert_eq!(refused.len(), 1);
    assert!(refused[0].contains("bus-net"), "refusal reported off the network thread: {}", refused[0]);
    assert_eq!(link.state(), ConnectionState::Disconnected);

    transport.close();

    let closed = wait_for_log(&logs, "Disconnected from broker");
    assert_eq!(closed.len(), 1);
    assert!(closed[0].contains("bus-net"), "close reported off the network thread: {}", closed[0]);
    assert_eq!(link.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_operations_without_connection_are_refused() {
    let transport = NatsTransport::new(&unreachable_config()).unwrap();

    let (ack, pending) = pending_ack();
    transport.subscribe("assistant/tts/say", ack);
    assert!(pending.acknowledged().await.is_err());

    // A dotted level has no subject equivalent even before connecting
    let (ack, pending) = pending_ack();
    transport.subscribe("assistant/v1.2/#", ack);
    let reason = pending.acknowledged().await.unwrap_err();
    assert!(reason.contains("v1.2"), "unexpected reason: {}", reason);
}
