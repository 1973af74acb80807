mod common;

use common::{desktop_voices, voice, FakeBackend};
use jvoice::backends::{EventSink, HostVoice, SpeechBackend, Utterance};
use jvoice::discovery::{DiscoveryConfig, DiscoveryController, DiscoveryState, FailureReason};
use jvoice::quality::VoiceQuality;
use jvoice::SpeechError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

mockall::mock! {
    pub Backend {}
    #[async_trait::async_trait]
    impl SpeechBackend for Backend {
        fn id(&self) -> &'static str;
        async fn is_supported(&self) -> bool;
        async fn list_voices(&self) -> Vec<HostVoice>;
        fn subscribe_inventory(&self) -> broadcast::Receiver<()>;
        fn request_inventory_refresh(&self);
        async fn speak(&self, utterance: Utterance, events: EventSink) -> std::io::Result<()>;
        fn cancel_current(&self);
    }
}

fn spawn(backend: Arc<FakeBackend>) -> jvoice::discovery::DiscoveryHandle {
    common::init_tracing();
    DiscoveryController::new(backend, DiscoveryConfig::default()).spawn()
}

#[tokio::test(start_paused = true)]
async fn test_first_attempt_maps_every_preset() {
    let backend = Arc::new(FakeBackend::new(desktop_voices()));
    let handle = spawn(backend.clone());

    let snapshot = handle.wait_until_settled().await.unwrap();
    assert_eq!(snapshot.state, DiscoveryState::Ready { inventory_size: 4 });
    assert!(snapshot.voices_loaded);
    assert_eq!(snapshot.mapping.len(), 8);
    assert_eq!(snapshot.status, "Ready - 4 voices loaded");
    assert_eq!(snapshot.stats.hindi, 1);
    assert_eq!(backend.list_calls(), 1);

    let raj = snapshot.binding("hi-IN-1").unwrap();
    assert_eq!(raj.host_voice.lang, "hi-IN");
    // Remote voice with no premium marker
    assert_eq!(raj.quality, VoiceQuality::Low);

    // Local desktop voice wins the British presets
    let oliver = snapshot.binding("en-GB-1").unwrap();
    assert_eq!(oliver.host_voice.name, "Daniel");
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_twenty_attempts() {
    let backend = Arc::new(FakeBackend::new(Vec::new()));
    let start = Instant::now();
    let handle = spawn(backend.clone());

    let err = handle.wait_until_settled().await.unwrap_err();
    assert!(matches!(err, SpeechError::DiscoveryExhausted { attempts: 20 }));

    // Three listings per attempt
    assert_eq!(backend.list_calls(), 60);
    assert_eq!(backend.refresh_requests(), 20);

    // 19 backoff waits (650ms rising to the 3s cap) plus 300ms of probe delays per attempt
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(53_000), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(54_000), "{:?}", elapsed);

    let snapshot = handle.snapshot();
    assert_eq!(
        snapshot.state,
        DiscoveryState::Failed {
            reason: FailureReason::DiscoveryExhausted
        }
    );
    assert_eq!(snapshot.retry_count, 20);
    assert_eq!(snapshot.status, "Failed to load");
    assert!(snapshot.error.as_deref().unwrap().contains("refresh"));

    // No further attempts are scheduled
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(backend.list_calls(), 60);
}

#[tokio::test(start_paused = true)]
async fn test_late_voices_recover_after_exhaustion() {
    let backend = Arc::new(FakeBackend::new(Vec::new()));
    let handle = spawn(backend.clone());
    assert!(handle.wait_until_settled().await.is_err());

    // An empty announcement leaves the failure in place
    backend.notify_change();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(backend.list_calls(), 63);
    assert!(matches!(
        handle.snapshot().state,
        DiscoveryState::Failed {
            reason: FailureReason::DiscoveryExhausted
        }
    ));

    backend.set_voices(desktop_voices());
    backend.notify_change();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.state, DiscoveryState::Ready { inventory_size: 4 });
    assert_eq!(snapshot.retry_count, 0);
    assert!(snapshot.voices_loaded);
    assert!(snapshot.error.is_none());
    assert_eq!(snapshot.mapping.len(), 8);

    // Recovery does not restart the retry loop
    let calls = backend.list_calls();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(backend.list_calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn test_reload_after_exhaustion() {
    let backend = Arc::new(FakeBackend::new(Vec::new()));
    let handle = spawn(backend.clone());
    assert!(handle.wait_until_settled().await.is_err());

    backend.set_voices(desktop_voices());
    handle.reload().await.unwrap();
    let snapshot = handle.wait_until_settled().await.unwrap();
    assert_eq!(snapshot.inventory.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_host_ignores_change_notifications() {
    let backend = Arc::new(FakeBackend::unsupported());
    let handle = spawn(backend.clone());
    assert!(matches!(
        handle.wait_until_settled().await,
        Err(SpeechError::UnsupportedHost)
    ));

    backend.set_voices(desktop_voices());
    backend.notify_change();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(backend.list_calls(), 0);
    assert!(matches!(
        handle.snapshot().state,
        DiscoveryState::Failed {
            reason: FailureReason::UnsupportedHost
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_retry_backs_off_then_succeeds() {
    let backend = Arc::new(FakeBackend::new(desktop_voices()));
    backend.script(vec![Vec::new(), Vec::new(), Vec::new()]);
    let start = Instant::now();
    let handle = spawn(backend.clone());

    let snapshot = handle.wait_until_settled().await.unwrap();
    assert_eq!(snapshot.retry_count, 0);
    assert_eq!(backend.list_calls(), 4);
    assert!(start.elapsed() >= Duration::from_millis(300 + 650));
}

#[tokio::test(start_paused = true)]
async fn test_late_voices_arrive_by_notification() {
    let backend = Arc::new(FakeBackend::new(Vec::new()));
    let handle = spawn(backend.clone());

    let mut state = handle.subscribe();
    state.wait_for(|s| s.retry_count >= 2).await.unwrap();
    assert!(!handle.snapshot().voices_loaded);

    backend.set_voices(vec![voice("Samantha", "en-US", true)]);
    backend.notify_change();

    let snapshot = handle.wait_until_settled().await.unwrap();
    assert_eq!(snapshot.retry_count, 0);
    assert_eq!(snapshot.inventory.len(), 1);

    // The pending retry was cancelled
    let calls = backend.list_calls();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(backend.list_calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn test_snapshots_never_show_half_built_mapping() {
    let backend = Arc::new(FakeBackend::new(desktop_voices()));
    let handle = spawn(backend.clone());
    let mut state = handle.subscribe();

    let observer = tokio::spawn(async move {
        let mut seen = 0;
        while state.changed().await.is_ok() {
            let s = state.borrow_and_update().clone();
            if s.voices_loaded {
                assert_eq!(s.inventory.len(), s.stats.total);
                assert_eq!(s.mapping.len(), 8);
            } else {
                assert!(s.mapping.is_empty());
                assert!(s.inventory.is_empty());
            }
            seen += 1;
        }
        seen
    });

    handle.wait_until_settled().await.unwrap();
    handle.reload().await.unwrap();
    handle.wait_until_settled().await.unwrap();
    handle.discover().await.unwrap();

    drop(handle);
    let seen = observer.await.unwrap();
    assert!(seen > 0);
}

#[tokio::test(start_paused = true)]
async fn test_reload_clears_and_rediscovers() {
    let backend = Arc::new(FakeBackend::new(desktop_voices()));
    let handle = spawn(backend.clone());
    handle.wait_until_settled().await.unwrap();

    backend.set_voices(vec![voice("Alex", "en-US", true)]);
    handle.reload().await.unwrap();

    let cleared = handle.snapshot();
    assert!(!cleared.voices_loaded);
    assert!(cleared.mapping.is_empty());
    assert_eq!(cleared.status, "Reloading...");
    assert_eq!(backend.refresh_requests(), 1);

    let snapshot = handle.wait_until_settled().await.unwrap();
    assert_eq!(snapshot.inventory.len(), 1);
    assert_eq!(snapshot.binding("en-US-1").unwrap().host_voice.name, "Alex");
}

#[tokio::test(start_paused = true)]
async fn test_manual_discover_reports_count() {
    let backend = Arc::new(FakeBackend::new(desktop_voices()));
    let handle = spawn(backend.clone());
    handle.wait_until_settled().await.unwrap();

    backend.set_voices(vec![voice("Alex", "en-US", true), voice("Veena", "en-IN", true)]);
    assert_eq!(handle.discover().await.unwrap(), 2);
    assert_eq!(handle.snapshot().stats.total, 2);
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_host_fails_without_probing() {
    let mut mock = MockBackend::new();
    let (changes, _) = broadcast::channel(4);
    mock.expect_id().return_const("mock");
    mock.expect_is_supported().times(1).returning(|| false);
    mock.expect_list_voices().times(0);
    mock.expect_subscribe_inventory()
        .returning(move || changes.subscribe());

    let handle = DiscoveryController::new(Arc::new(mock), DiscoveryConfig::default()).spawn();
    let err = handle.wait_until_settled().await.unwrap_err();
    assert!(matches!(err, SpeechError::UnsupportedHost));

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.status, "Not supported");
    assert!(snapshot.error.as_deref().unwrap().contains("not supported"));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_handle_stops_listening() {
    let backend = Arc::new(FakeBackend::new(Vec::new()));
    let handle = spawn(backend.clone());
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(handle);
    tokio::task::yield_now().await;

    let calls = backend.list_calls();
    backend.set_voices(desktop_voices());
    backend.notify_change();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(backend.list_calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_is_orderly() {
    let backend = Arc::new(FakeBackend::new(desktop_voices()));
    let mut handle = spawn(backend);
    handle.wait_until_settled().await.unwrap();
    handle.shutdown().await;
    assert!(matches!(
        handle.discover().await,
        Err(SpeechError::ControllerClosed)
    ));
}
