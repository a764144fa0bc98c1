//! Tests for the connection reader and writer tasks

use super::*;
use std::time::Duration;

use audit_config::StreamerConfig;

use crate::connection::ConnectionStatus;
use crate::protocol::MessageType;
use crate::transport::channel;

fn setup(config: StreamerConfig) -> (Arc<Shared>, Arc<Connection>, mpsc::Receiver<Arc<OutboundMessage>>) {
    let shared = Arc::new(Shared::new(config));
    let (connection, rx) = Connection::new(
        None,
        "mem:io",
        &shared.config,
        CancellationToken::new(),
    );
    let connection = Arc::new(connection);
    connection.activate();
    shared.registry.register(Arc::clone(&connection)).unwrap();
    (shared, connection, rx)
}

// ============================================================================
// Control dispatch
// ============================================================================

#[test]
fn test_add_filter_is_acknowledged() {
    let (shared, connection, mut rx) = setup(StreamerConfig::default());

    handle_text(
        &connection,
        &shared,
        r#"{"type":"add_filter","filter":{"name":"a","event_types":["A"]}}"#,
    );

    let ack = rx.try_recv().unwrap();
    assert_eq!(ack.message_type, MessageType::FilterAdded);
    assert_eq!(ack.data["replaced"], false);
    assert_eq!(connection.filter_count(), 1);

    handle_text(
        &connection,
        &shared,
        r#"{"type":"add_filter","filter":{"name":"a","event_types":["B"]}}"#,
    );
    let ack = rx.try_recv().unwrap();
    assert_eq!(ack.data["replaced"], true);
    assert_eq!(connection.filter_count(), 1);
}

#[test]
fn test_invalid_filter_gets_error_reply() {
    let (shared, connection, mut rx) = setup(StreamerConfig::default());

    handle_text(
        &connection,
        &shared,
        r#"{"type":"add_filter","filter":{"name":"  "}}"#,
    );

    let reply = rx.try_recv().unwrap();
    assert_eq!(reply.message_type, MessageType::Error);
    assert_eq!(reply.data["code"], "validation");
    assert_eq!(connection.filter_count(), 0);
}

#[test]
fn test_remove_filter_reply() {
    let (shared, connection, mut rx) = setup(StreamerConfig::default());
    connection
        .add_filter(crate::filter::AuditFilter::new("a"), 10)
        .unwrap();

    handle_text(&connection, &shared, r#"{"type":"remove_filter","filter_name":"a"}"#);

    let reply = rx.try_recv().unwrap();
    assert_eq!(reply.message_type, MessageType::FilterRemoved);
    assert_eq!(reply.data["filter_name"], "a");
    assert_eq!(connection.filter_count(), 0);
}

#[test]
fn test_ping_and_pong() {
    let (shared, connection, mut rx) = setup(StreamerConfig::default());

    handle_text(&connection, &shared, r#"{"type":"ping"}"#);
    assert_eq!(rx.try_recv().unwrap().message_type, MessageType::Pong);

    handle_text(&connection, &shared, r#"{"type":"pong"}"#);
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_malformed_and_unknown_are_ignored() {
    let (shared, connection, mut rx) = setup(StreamerConfig::default());

    handle_text(&connection, &shared, "{{{");
    handle_text(&connection, &shared, r#"{"type":"replay","from":0}"#);

    assert!(rx.try_recv().is_err());
    assert!(connection.is_active());
}

// ============================================================================
// Reader task
// ============================================================================

#[tokio::test]
async fn test_reader_client_close() {
    let (shared, connection, _rx) = setup(StreamerConfig::default());
    let (transport, client) = channel("mem:r1", 8);
    let (source, _sink, _) = transport.into_parts();

    let reader = tokio::spawn(run_reader(source, Arc::clone(&connection), Arc::clone(&shared)));
    client.close().await;
    reader.await.unwrap();

    assert_eq!(connection.status(), ConnectionStatus::Closing);
    assert_eq!(connection.close_reason(), Some(CloseReason::ClientClose));
}

#[tokio::test]
async fn test_reader_dispatches_until_cancelled() {
    let (shared, connection, mut rx) = setup(StreamerConfig::default());
    let (transport, client) = channel("mem:r2", 8);
    let (source, _sink, _) = transport.into_parts();

    let reader = tokio::spawn(run_reader(source, Arc::clone(&connection), Arc::clone(&shared)));
    client.send_text(r#"{"type":"ping"}"#).await.unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.message_type, MessageType::Pong);

    connection.close(CloseReason::AdminClose);
    reader.await.unwrap();
    assert_eq!(connection.close_reason(), Some(CloseReason::AdminClose));
}

// ============================================================================
// Writer task
// ============================================================================

#[tokio::test]
async fn test_writer_sends_in_order_and_finishes_teardown() {
    let (shared, connection, rx) = setup(StreamerConfig::default());
    let (transport, mut client) = channel("mem:w1", 8);
    let (_source, sink, _) = transport.into_parts();

    connection.send_control(OutboundMessage::pong());
    connection.send_control(OutboundMessage::filter_removed("x"));

    let writer = tokio::spawn(run_writer(
        sink,
        rx,
        Arc::clone(&connection),
        Arc::clone(&shared),
    ));

    assert_eq!(
        client.recv_message().await.unwrap().message_type,
        MessageType::Pong
    );
    assert_eq!(
        client.recv_message().await.unwrap().message_type,
        MessageType::FilterRemoved
    );

    connection.close(CloseReason::ClientClose);
    writer.await.unwrap();

    assert_eq!(connection.status(), ConnectionStatus::Closed);
    assert!(shared.registry.is_empty());
    assert_eq!(connection.messages_sent(), 2);
    assert_eq!(shared.metrics.snapshot().messages_sent, 2);
    assert_eq!(client.recv().await, Some(crate::transport::Frame::Close));
}

#[tokio::test]
async fn test_writer_write_failure_tears_down() {
    let (shared, connection, rx) = setup(StreamerConfig::default());
    let (transport, client) = channel("mem:w2", 8);
    let (_source, sink, _) = transport.into_parts();
    drop(client);

    connection.send_control(OutboundMessage::pong());
    run_writer(sink, rx, Arc::clone(&connection), Arc::clone(&shared)).await;

    assert_eq!(connection.close_reason(), Some(CloseReason::Error));
    assert_eq!(connection.status(), ConnectionStatus::Closed);
    assert!(shared.registry.is_empty());
    assert_eq!(shared.metrics.snapshot().errors, 1);
}

#[tokio::test(start_paused = true)]
async fn test_writer_keepalive() {
    let (shared, connection, rx) = setup(StreamerConfig {
        keepalive_interval: Duration::from_secs(5),
        ..StreamerConfig::default()
    });
    let (transport, mut client) = channel("mem:w3", 8);
    let (_source, sink, _) = transport.into_parts();

    let writer = tokio::spawn(run_writer(
        sink,
        rx,
        Arc::clone(&connection),
        Arc::clone(&shared),
    ));

    let started = tokio::time::Instant::now();
    let ping = client.recv_message().await.unwrap();
    assert_eq!(ping.message_type, MessageType::Ping);
    assert!(started.elapsed() >= Duration::from_secs(5));

    connection.close(CloseReason::ClientClose);
    writer.await.unwrap();
}

#[tokio::test]
async fn test_writer_exit_records_disconnect_once() {
    let (shared, connection, rx) = setup(StreamerConfig::default());
    shared.metrics.record_connection_opened(1);
    let (transport, _client) = channel("mem:w4", 8);
    let (_source, sink, _) = transport.into_parts();

    // another path already removed the entry
    shared.registry.unregister(connection.id());
    shared.metrics.record_connection_closed(0);

    connection.close(CloseReason::Timeout);
    run_writer(sink, rx, Arc::clone(&connection), Arc::clone(&shared)).await;

    let metrics = shared.metrics.snapshot();
    assert_eq!(metrics.active_connections, 0);
    assert_eq!(connection.status(), ConnectionStatus::Closed);
}
