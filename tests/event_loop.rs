use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use meshgpt::bridge::pipeline::PipelineSettings;
use meshgpt::bridge::InboundEvent;
use tokio::sync::mpsc;
mod common;
use common::{fixture, RecordingTransport, ScriptedBackend, SlowBackend, CADEN, ME};

#[tokio::test]
async fn sequential_loop_answers_in_arrival_order() {
    let backend = Arc::new(ScriptedBackend::new(vec![Ok("one"), Ok("two"), Ok("three")]));
    let f = fixture(backend, RecordingTransport::default(), PipelineSettings::default());

    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(InboundEvent::text(CADEN, ME, 0, "a")).unwrap();
    tx.send(InboundEvent::text(CADEN, "^all", 0, "noise")).unwrap();
    tx.send(InboundEvent::text(CADEN, "^all", 1, "@meshgpt b")).unwrap();
    tx.send(InboundEvent::text("!00000002", ME, 0, "c")).unwrap();
    drop(tx);

    f.server.run_until(rx, std::future::pending()).await.unwrap();

    let texts = f.transport.texts();
    assert_eq!(texts.len(), 3);
    assert!(texts[0].starts_with("one ["));
    assert!(texts[1].starts_with("@Caden, two ["));
    assert!(texts[2].starts_with("three ["));
}

#[tokio::test]
async fn worker_pool_overlaps_replies_and_drains_on_close() {
    let backend = Arc::new(SlowBackend::new(Duration::from_millis(150)));
    let f = fixture(backend.clone(), RecordingTransport::default(), PipelineSettings::default());
    let server = f.server.with_max_concurrent(3);

    let (tx, rx) = mpsc::unbounded_channel();
    for i in 0..6 {
        let sender = format!("!0000000{}", i + 1);
        tx.send(InboundEvent::text(&sender, ME, 0, "hello")).unwrap();
    }
    drop(tx);

    server.run_until(rx, std::future::pending()).await.unwrap();

    // every reply finished before run_until returned
    assert_eq!(backend.calls.load(Ordering::SeqCst), 6);
    assert_eq!(f.transport.texts().len(), 6);
    let peak = backend.peak.load(Ordering::SeqCst);
    assert!(peak > 1, "expected overlap, peak={}", peak);
    assert!(peak <= 3, "pool exceeded its bound, peak={}", peak);
}

#[tokio::test]
async fn shutdown_signal_waits_for_in_flight_reply() {
    let backend = Arc::new(SlowBackend::new(Duration::from_millis(200)));
    let f = fixture(backend.clone(), RecordingTransport::default(), PipelineSettings::default());
    let server = f.server.with_max_concurrent(2);

    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(InboundEvent::text(CADEN, ME, 0, "slow question")).unwrap();

    // shut down while the reply is still being generated; keep tx alive so only the
    // signal can stop the loop
    let shutdown = tokio::time::sleep(Duration::from_millis(50));
    tokio::time::timeout(Duration::from_secs(5), server.run_until(rx, shutdown))
        .await
        .expect("loop stopped")
        .unwrap();

    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    assert_eq!(f.transport.texts().len(), 1);
    drop(tx);
}

#[tokio::test]
async fn generation_timeout_is_reported_and_loop_continues() {
    let backend = Arc::new(SlowBackend::new(Duration::from_secs(5)));
    let settings = PipelineSettings {
        timeout: Some(Duration::from_millis(50)),
        ..PipelineSettings::default()
    };
    let f = fixture(backend, RecordingTransport::default(), settings);

    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(InboundEvent::text(CADEN, ME, 0, "a")).unwrap();
    tx.send(InboundEvent::text(CADEN, ME, 0, "b")).unwrap();
    drop(tx);

    tokio::time::timeout(Duration::from_secs(2), f.server.run_until(rx, std::future::pending()))
        .await
        .expect("timeouts bound each generation")
        .unwrap();
    assert!(f.transport.texts().is_empty());
}

#[tokio::test]
async fn shutdown_is_noticed_while_pool_is_full() {
    let backend = Arc::new(SlowBackend::new(Duration::from_millis(500)));
    let f = fixture(backend.clone(), RecordingTransport::default(), PipelineSettings::default());
    let server = f.server.with_max_concurrent(2);

    let (tx, rx) = mpsc::unbounded_channel();
    for i in 0..3 {
        let sender = format!("!0000000{}", i + 1);
        tx.send(InboundEvent::text(&sender, ME, 0, "hello")).unwrap();
    }

    // the third message is waiting for a free worker when the signal arrives
    let shutdown = tokio::time::sleep(Duration::from_millis(50));
    tokio::time::timeout(Duration::from_secs(5), server.run_until(rx, shutdown))
        .await
        .expect("loop stopped")
        .unwrap();

    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    assert_eq!(f.transport.texts().len(), 2);
    drop(tx);
}
