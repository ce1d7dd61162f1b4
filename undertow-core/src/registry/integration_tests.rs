//! Registry behaviour driven through the handle with a mock engine.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use super::{AttachRequest, RegistryError, RegistryHandle, spawn_registry};
use crate::config::UndertowConfig;
use crate::engine::Priority;
use crate::magnet::MagnetLink;
use crate::session::SessionState;
use crate::telemetry::TelemetryEvent;
use crate::testing::{MockTransferFactory, RecordingTelemetry, single_file_layout};

struct Harness {
    handle: RegistryHandle,
    factory: MockTransferFactory,
    telemetry: RecordingTelemetry,
    config: UndertowConfig,
}

fn harness_with(config: UndertowConfig, factory: MockTransferFactory) -> Harness {
    let telemetry = RecordingTelemetry::new();
    let handle = spawn_registry(
        config.clone(),
        Arc::new(factory.clone()),
        Arc::new(telemetry.clone()),
    );
    Harness {
        handle,
        factory,
        telemetry,
        config,
    }
}

fn harness() -> Harness {
    harness_with(UndertowConfig::for_testing(), MockTransferFactory::new())
}

fn link(seed: u8) -> MagnetLink {
    MagnetLink::parse(&format!(
        "magnet:?xt=urn:btih:{}&dn=Feature+{}",
        hex::encode([seed; 20]),
        seed
    ))
    .unwrap()
}

fn request(seed: u8) -> AttachRequest {
    AttachRequest::new(link(seed))
}

async fn sleep_secs(seconds: u64) {
    tokio::time::sleep(Duration::from_secs(seconds)).await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_attach_shares_one_session() {
    let h = harness();

    let (first, second) = tokio::join!(h.handle.attach(request(1)), h.handle.attach(request(1)));
    let first = first.unwrap();
    let second = second.unwrap();

    assert_eq!(first.guard.session(), second.guard.session());
    assert_eq!(h.factory.started_count(), 1);
    assert_eq!(second.status.connections, 2);
    assert_eq!(second.status.state, SessionState::AcquiringMetadata);
    assert!(second.stream.is_none());

    let statuses = h.handle.statuses().await.unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].dn, "Feature 1");
    assert_eq!(h.telemetry.count(TelemetryEvent::Added), 1);
}

#[tokio::test(start_paused = true)]
async fn test_ready_activates_and_tracks_readiness() {
    let h = harness();
    let info_hash = link(2).info_hash;

    let _attachment = h.handle.attach(request(2)).await.unwrap();
    let transfer = h.factory.transfer(info_hash).unwrap();
    assert!(transfer.emit_ready(single_file_layout("feature.mp4", 100 * 16_384, 16_384)));

    let status = h.handle.status(info_hash).await.unwrap().unwrap();
    assert_eq!(status.state, SessionState::Active);
    let content = status.content.unwrap();
    assert_eq!(content.pieces, 100);
    assert_eq!(content.pieces_preload, 1);
    assert!(!content.video_ready);
    assert!(transfer.is_selected(0));
    assert_eq!(
        transfer.priority_requests(),
        vec![(0..1, Priority::High), (99..100, Priority::High)]
    );

    transfer.emit_verified(0);
    transfer.emit_verified(99);
    let status = h.handle.status(info_hash).await.unwrap().unwrap();
    assert!(status.content.unwrap().video_ready);
    assert_eq!(h.telemetry.count(TelemetryEvent::MetadataReceived), 1);

    transfer.emit_idle();
    let status = h.handle.status(info_hash).await.unwrap().unwrap();
    assert_eq!(status.state, SessionState::Finished);
    assert_eq!(h.telemetry.count(TelemetryEvent::Finished), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pause_then_resume_cancels_timers() {
    let h = harness();
    let info_hash = link(3).info_hash;
    let lifecycle = h.config.lifecycle.clone();

    let attachment = h.handle.attach(request(3)).await.unwrap();
    let transfer = h.factory.transfer(info_hash).unwrap();
    transfer.emit_ready(single_file_layout("feature.mkv", 1_000_000, 16_384));
    drop(attachment);

    tokio::time::sleep(lifecycle.pause_timeout + Duration::from_millis(500)).await;
    let status = h.handle.status(info_hash).await.unwrap().unwrap();
    assert!(status.paused);
    assert!(!transfer.is_selected(0));

    // Reconnect before the remove timer elapses
    let attachment = h.handle.attach(request(3)).await.unwrap();
    assert!(!attachment.status.paused);
    assert!(transfer.is_selected(0));

    tokio::time::sleep(lifecycle.remove_timeout * 3).await;
    let status = h.handle.status(info_hash).await.unwrap().unwrap();
    assert!(!status.paused);
    assert_eq!(status.connections, 1);
    assert_eq!(transfer.shutdown_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_idle_session_is_destroyed_once() {
    let h = harness();
    let info_hash = link(4).info_hash;
    let lifecycle = h.config.lifecycle.clone();

    let attachment = h.handle.attach(request(4)).await.unwrap();
    let transfer = h.factory.transfer(info_hash).unwrap();
    transfer.emit_ready(single_file_layout("feature.mkv", 1_000_000, 16_384));
    drop(attachment);

    tokio::time::sleep(lifecycle.pause_timeout + lifecycle.remove_timeout + Duration::from_secs(1))
        .await;

    assert!(h.handle.status(info_hash).await.unwrap().is_none());
    assert!(h.handle.statuses().await.unwrap().is_empty());
    assert_eq!(transfer.shutdown_count(), 1);
    assert_eq!(transfer.removal_count(), 1);
    assert_eq!(h.telemetry.count(TelemetryEvent::Removed), 1);

    // Content can come back as a brand-new session
    let attachment = h.handle.attach(request(4)).await.unwrap();
    assert_eq!(attachment.status.state, SessionState::AcquiringMetadata);
    assert_eq!(h.factory.started_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_keep_files_skips_data_removal() {
    let mut config = UndertowConfig::for_testing();
    config.storage.keep_files = true;
    let h = harness_with(config, MockTransferFactory::new());
    let info_hash = link(5).info_hash;

    drop(h.handle.attach(request(5)).await.unwrap());
    sleep_secs(10).await;

    let transfer = h.factory.transfer(info_hash).unwrap();
    assert!(h.handle.status(info_hash).await.unwrap().is_none());
    assert_eq!(transfer.shutdown_count(), 1);
    assert_eq!(transfer.removal_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_metadata_timeout_fails_session() {
    let h = harness();
    let info_hash = link(6).info_hash;

    let first = h.handle.attach(request(6)).await.unwrap();
    tokio::time::sleep(h.config.lifecycle.metadata_timeout + Duration::from_secs(1)).await;

    let second = h.handle.attach(request(6)).await.unwrap();
    assert_eq!(second.status.state, SessionState::Failed);
    assert!(second.stream.is_none());
    assert_eq!(h.telemetry.count(TelemetryEvent::MetadataFailed), 1);

    // A late layout does not revive a failed session
    let transfer = h.factory.transfer(info_hash).unwrap();
    transfer.emit_ready(single_file_layout("late.mkv", 1000, 100));
    let status = h.handle.status(info_hash).await.unwrap().unwrap();
    assert_eq!(status.state, SessionState::Failed);
    assert!(!status.paused);

    drop(first);
    drop(second);
    sleep_secs(10).await;
    assert!(h.handle.status(info_hash).await.unwrap().is_none());
    assert_eq!(h.factory.started_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_engine_failure_destroys_session() {
    let h = harness();
    let info_hash = link(7).info_hash;

    let attachment = h.handle.attach(request(7)).await.unwrap();
    let old_transfer = h.factory.transfer(info_hash).unwrap();
    old_transfer.emit_failed("disk full");

    assert!(h.handle.status(info_hash).await.unwrap().is_none());
    assert_eq!(h.telemetry.count(TelemetryEvent::TransferFailed), 1);

    // The old guard and late events must not touch the new session
    let replacement = h.handle.attach(request(7)).await.unwrap();
    assert_eq!(h.factory.started_count(), 2);
    drop(attachment);
    old_transfer.emit_ready(single_file_layout("stale.mkv", 1000, 100));

    let status = h.handle.status(info_hash).await.unwrap().unwrap();
    assert_eq!(status.state, SessionState::AcquiringMetadata);
    assert_eq!(status.connections, 1);
    drop(replacement);

    sleep_secs(1).await;
    assert_eq!(old_transfer.shutdown_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_serving_event_fires_once() {
    let layout = single_file_layout("feature.mp4", 4096, 1024);
    let factory = MockTransferFactory::with_content(layout, vec![vec![7u8; 4096].into()]);
    let h = harness_with(UndertowConfig::for_testing(), factory);
    let info_hash = link(8).info_hash;

    // First attach creates the session; the layout arrives right after
    drop(h.handle.attach(request(8)).await.unwrap());
    let attachment = h.handle.attach(request(8)).await.unwrap();
    let source = attachment.stream.as_ref().unwrap();
    assert_eq!(source.path(), "feature.mp4");
    assert_eq!(source.length(), 4096);

    for _ in 0..3 {
        let mut stream = source.open(0..1000).unwrap();
        while let Some(chunk) = stream.next().await {
            source.meter().record(chunk.unwrap().len() as u64);
        }
    }
    assert_eq!(source.meter().streamed(), 3000);

    h.handle.statuses().await.unwrap();
    assert_eq!(h.telemetry.count(TelemetryEvent::Serving), 1);
    assert!(h.handle.status(info_hash).await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_start_failure_creates_nothing() {
    let h = harness_with(UndertowConfig::for_testing(), MockTransferFactory::failing());

    let result = h.handle.attach(request(9)).await;
    assert!(matches!(result, Err(RegistryError::StartFailed { .. })));
    assert!(h.handle.statuses().await.unwrap().is_empty());
    assert!(h.telemetry.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_tears_everything_down() {
    let h = harness();

    let attachment = h.handle.attach(request(10)).await.unwrap();
    let _other = h.handle.attach(request(11)).await.unwrap();

    h.handle.shutdown().await.unwrap();

    for seed in [10, 11] {
        let transfer = h.factory.transfer(link(seed).info_hash).unwrap();
        assert_eq!(transfer.shutdown_count(), 1);
        assert_eq!(transfer.removal_count(), 1);
    }
    assert_eq!(h.telemetry.count(TelemetryEvent::Removed), 2);
    assert!(matches!(
        h.handle.statuses().await,
        Err(RegistryError::Stopped)
    ));

    // Releasing a guard after shutdown is harmless
    drop(attachment);
}

#[tokio::test(start_paused = true)]
async fn test_remove_timer_needs_idle_session() {
    let h = harness();
    let info_hash = link(12).info_hash;
    let lifecycle = h.config.lifecycle.clone();

    drop(h.handle.attach(request(12)).await.unwrap());
    tokio::time::sleep(lifecycle.pause_timeout + Duration::from_millis(500)).await;

    // Attached while the remove timer is pending, then detached again
    drop(h.handle.attach(request(12)).await.unwrap());
    tokio::time::sleep(lifecycle.remove_timeout).await;
    assert!(h.handle.status(info_hash).await.unwrap().is_some());

    tokio::time::sleep(lifecycle.pause_timeout + Duration::from_secs(1)).await;
    assert!(h.handle.status(info_hash).await.unwrap().is_none());
    assert_eq!(h.telemetry.count(TelemetryEvent::Removed), 1);
}
