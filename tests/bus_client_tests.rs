// Integration tests for the bus client
//
// Every test runs the client against the in-process broker, whose transports
// call back from their own network thread just like the NATS transport.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use voice_assistant::bus::{BusClient, BusError, BusOptions, ConnectionState, MemoryBroker, QualityOfService};

fn test_options() -> BusOptions {
    BusOptions {
        base_topic: "assistant".to_string(),
        connect_timeout: Duration::from_millis(200),
        publish_timeout: Duration::from_millis(200),
        disconnect_grace: Duration::from_millis(200),
        subscribe_poll: Duration::from_millis(20),
        ..BusOptions::default()
    }
}

fn client(broker: &MemoryBroker) -> Arc<BusClient> {
    Arc::new(BusClient::new(Arc::new(broker.transport()), test_options()))
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let broker = MemoryBroker::new();
    let bus = client(&broker);

    assert_eq!(bus.state(), ConnectionState::Disconnected);
    bus.connect().await.unwrap();
    assert_eq!(bus.state(), ConnectionState::Connected);

    bus.connect().await.unwrap();
    bus.connect().await.unwrap();
    assert_eq!(broker.open_count(), 1);
}

#[tokio::test]
async fn test_concurrent_connect_opens_one_socket() {
    let broker = MemoryBroker::new();
    let bus = client(&broker);

    let (a, b, c) = tokio::join!(bus.connect(), bus.connect(), bus.connect());
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(broker.open_count(), 1);
    assert_eq!(broker.connection_count(), 1);
}

#[tokio::test]
async fn test_concurrent_connect_while_connected() {
    let broker = MemoryBroker::new();
    let bus = client(&broker);
    bus.connect().await.unwrap();

    let (a, b, c, d) = tokio::join!(bus.connect(), bus.connect(), bus.connect(), bus.connect());
    assert!(a.is_ok() && b.is_ok() && c.is_ok() && d.is_ok());
    assert_eq!(bus.state(), ConnectionState::Connected);
    assert_eq!(broker.open_count(), 1);
    assert_eq!(broker.connection_count(), 1);
}

#[tokio::test]
async fn test_publish_connects_implicitly() {
    let broker = MemoryBroker::new();
    let bus = client(&broker);

    bus.publish_text("spotify/play", "true").await.unwrap();

    assert!(bus.is_connected());
    assert_eq!(broker.open_count(), 1);
    assert_eq!(broker.published_on("assistant/spotify/play"), vec!["true"]);
}

#[tokio::test]
async fn test_publish_uses_default_qos_without_retain() {
    let broker = MemoryBroker::new();
    let bus = client(&broker);

    bus.publish_text("log/info", "hola").await.unwrap();
    bus.publish("log/info", "adios", QualityOfService::AtMostOnce, true)
        .await
        .unwrap();

    let published = broker.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].qos, QualityOfService::AtLeastOnce);
    assert!(!published[0].retain);
    assert_eq!(published[1].qos, QualityOfService::AtMostOnce);
    assert!(published[1].retain);
}

#[tokio::test]
async fn test_rejected_handshake_fails_publish() {
    let broker = MemoryBroker::new();
    broker.reject_handshakes(Some("not authorized"));
    let bus = client(&broker);

    let err = bus.publish_text("spotify/play", "true").await.unwrap_err();

    assert_eq!(err, BusError::Connection("not authorized".to_string()));
    assert_eq!(bus.state(), ConnectionState::Disconnected);
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn test_connect_succeeds_after_rejection_is_lifted() {
    let broker = MemoryBroker::new();
    broker.reject_handshakes(Some("not authorized"));
    let bus = client(&broker);

    assert!(matches!(bus.connect().await, Err(BusError::Connection(_))));

    broker.reject_handshakes(None);
    bus.connect().await.unwrap();
    assert_eq!(broker.open_count(), 2);
}

#[tokio::test]
async fn test_disconnect_twice() {
    let broker = MemoryBroker::new();
    let bus = client(&broker);

    // Disconnecting a client that never connected is a no-op
    bus.disconnect().await;
    assert_eq!(bus.state(), ConnectionState::Disconnected);

    bus.connect().await.unwrap();
    bus.disconnect().await;
    bus.disconnect().await;

    assert_eq!(bus.state(), ConnectionState::Disconnected);
    assert_eq!(broker.connection_count(), 0);
}

#[tokio::test]
async fn test_reconnects_after_connection_drop() {
    let broker = MemoryBroker::new();
    let bus = client(&broker);

    bus.connect().await.unwrap();
    broker.drop_connections("network unreachable");
    assert!(wait_until(|| bus.state() == ConnectionState::Disconnected).await);

    bus.publish_text("spotify/next", "1").await.unwrap();

    assert_eq!(broker.open_count(), 2);
    assert_eq!(broker.published_on("assistant/spotify/next"), vec!["1"]);
}

#[tokio::test]
async fn test_connect_times_out_on_stalled_broker() {
    let broker = MemoryBroker::new();
    broker.set_stalled(true);
    let bus = client(&broker);

    let err = bus.connect().await.unwrap_err();
    assert!(matches!(err, BusError::Timeout { operation: "connect", .. }));

    // The half-open attempt is abandoned
    assert!(wait_until(|| bus.state() == ConnectionState::Disconnected).await);

    broker.set_stalled(false);
    bus.connect().await.unwrap();
    assert_eq!(broker.open_count(), 2);
}

#[tokio::test]
async fn test_publish_times_out_without_ack() {
    let broker = MemoryBroker::new();
    let bus = client(&broker);
    bus.connect().await.unwrap();

    broker.set_stalled(true);
    let err = bus.publish_text("tts/say", "hola").await.unwrap_err();

    assert!(matches!(err, BusError::Timeout { operation: "publish", .. }));
}

#[tokio::test]
async fn test_publish_fails_when_connection_drops_before_ack() {
    let broker = MemoryBroker::new();
    let bus = client(&broker);
    bus.connect().await.unwrap();
    broker.set_stalled(true);

    let publisher = Arc::clone(&bus);
    let pending = tokio::spawn(async move { publisher.publish_text("tts/say", "hola").await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    broker.drop_connections("connection reset");

    let err = pending.await.unwrap().unwrap_err();
    match err {
        BusError::Publish { topic, .. } => assert_eq!(topic, "assistant/tts/say"),
        other => panic!("expected publish error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_subscribe_round_trip_delivers_once() {
    let broker = MemoryBroker::new();
    let bus = client(&broker);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let subscriber = Arc::clone(&bus);
    let subscription = tokio::spawn(async move {
        subscriber
            .subscribe_loop("tts/say", move |message| {
                tx.send(message.payload_text().into_owned())?;
                Ok(())
            })
            .await
    });

    assert!(wait_until(|| broker.has_subscriber("assistant/tts/say")).await);
    bus.publish_text("tts/say", "buenos dias").await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
    assert_eq!(received.as_deref(), Some("buenos dias"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err(), "message delivered more than once");

    bus.disconnect().await;
    let result = tokio::time::timeout(Duration::from_secs(1), subscription).await.unwrap();
    assert!(result.unwrap().is_ok());
}

#[tokio::test]
async fn test_subscribe_loop_ignores_other_topics() {
    let broker = MemoryBroker::new();
    let bus = client(&broker);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let subscriber = Arc::clone(&bus);
    let subscription = tokio::spawn(async move {
        subscriber
            .subscribe_loop("spotify/+", move |message| {
                tx.send(message.topic.clone())?;
                Ok(())
            })
            .await
    });

    assert!(wait_until(|| broker.has_subscriber("assistant/spotify/next")).await);
    bus.publish_text("tts/say", "hola").await.unwrap();
    bus.publish_text("spotify/next", "1").await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
    assert_eq!(received.as_deref(), Some("assistant/spotify/next"));

    subscription.abort();
}

#[tokio::test]
async fn test_subscribe_loop_exits_when_connection_drops() {
    let broker = MemoryBroker::new();
    let bus = client(&broker);

    let subscriber = Arc::clone(&bus);
    let subscription = tokio::spawn(async move { subscriber.subscribe_loop("#", |_| Ok(())).await });

    assert!(wait_until(|| broker.has_subscriber("assistant/anything")).await);
    broker.drop_connections("broker restarted");

    let result = tokio::time::timeout(Duration::from_secs(1), subscription)
        .await
        .expect("subscribe loop kept running after the connection dropped");
    assert!(result.unwrap().is_ok());
    assert_eq!(bus.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_latest_subscription_wins() {
    let broker = MemoryBroker::new();
    let bus = client(&broker);
    let (first_tx, mut first_rx) = mpsc::unbounded_channel::<String>();
    let (second_tx, mut second_rx) = mpsc::unbounded_channel::<String>();

    let subscriber = Arc::clone(&bus);
    let first = tokio::spawn(async move {
        subscriber
            .subscribe_loop("tts/say", move |message| {
                first_tx.send(message.payload_text().into_owned())?;
                Ok(())
            })
            .await
    });
    assert!(wait_until(|| broker.has_subscriber("assistant/tts/say")).await);

    let subscriber = Arc::clone(&bus);
    let second = tokio::spawn(async move {
        subscriber
            .subscribe_loop("tts/#", move |message| {
                second_tx.send(message.payload_text().into_owned())?;
                Ok(())
            })
            .await
    });
    assert!(wait_until(|| broker.has_subscriber("assistant/tts/other")).await);

    bus.publish_text("tts/say", "hola").await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(1), second_rx.recv()).await.unwrap();
    assert_eq!(received.as_deref(), Some("hola"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(first_rx.try_recv().is_err(), "replaced handler still received messages");

    bus.disconnect().await;
    assert!(first.await.unwrap().is_ok());
    assert!(second.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_handler_panic_does_not_stop_delivery() {
    let broker = MemoryBroker::new();
    let bus = client(&broker);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let subscriber = Arc::clone(&bus);
    let subscription = tokio::spawn(async move {
        subscriber
            .subscribe_loop("log/#", move |message| {
                let text = message.payload_text().into_owned();
                if text == "boom" {
                    panic!("handler exploded");
                }
                if text == "fail" {
                    anyhow::bail!("handler refused message");
                }
                tx.send(text)?;
                Ok(())
            })
            .await
    });
    assert!(wait_until(|| broker.has_subscriber("assistant/log/info")).await);

    bus.publish_text("log/info", "boom").await.unwrap();
    bus.publish_text("log/info", "fail").await.unwrap();
    bus.publish_text("log/info", "still here").await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
    assert_eq!(received.as_deref(), Some("still here"));

    subscription.abort();
}

#[tokio::test]
async fn test_retained_message_reaches_late_subscriber() {
    let broker = MemoryBroker::new();
    let publisher = client(&broker);
    publisher
        .publish("spotify/play_song", "bohemian rhapsody", QualityOfService::AtLeastOnce, true)
        .await
        .unwrap();

    let bus = client(&broker);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscriber = Arc::clone(&bus);
    let subscription = tokio::spawn(async move {
        subscriber
            .subscribe_loop("spotify/#", move |message| {
                tx.send(message.payload_text().into_owned())?;
                Ok(())
            })
            .await
    });

    let received = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
    assert_eq!(received.as_deref(), Some("bohemian rhapsody"));

    subscription.abort();
}

#[tokio::test]
async fn test_refused_subscription_is_reported() {
    let broker = MemoryBroker::new();
    broker.reject_subscriptions(Some("permissions violation"));
    let bus = client(&broker);

    let result = tokio::time::timeout(Duration::from_secs(1), bus.subscribe_loop("tts/say", |_| Ok(())))
        .await
        .expect("subscribe loop kept running after the broker refused it");

    assert_eq!(
        result.unwrap_err(),
        BusError::Subscribe {
            pattern: "assistant/tts/say".to_string(),
            reason: "permissions violation".to_string(),
        }
    );
    assert!(!broker.has_subscriber("assistant/tts/say"));
    // The connection itself stays up
    assert!(bus.is_connected());

    broker.reject_subscriptions(None);
    let subscriber = Arc::clone(&bus);
    let subscription = tokio::spawn(async move { subscriber.subscribe_loop("tts/say", |_| Ok(())).await });
    assert!(wait_until(|| broker.has_subscriber("assistant/tts/say")).await);
    subscription.abort();
}

#[tokio::test]
async fn test_subscribe_times_out_without_ack() {
    let broker = MemoryBroker::new();
    let bus = client(&broker);
    bus.connect().await.unwrap();

    broker.set_stalled(true);
    let err = bus.subscribe_loop("spotify/#", |_| Ok(())).await.unwrap_err();

    assert!(matches!(err, BusError::Timeout { operation: "subscribe", .. }));
}
