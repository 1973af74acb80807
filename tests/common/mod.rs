#![allow(dead_code)]

use async_trait::async_trait;
use jvoice::backends::{
    EventSink, HostVoice, SpeechBackend, SynthesisEvent, SynthesisEventKind, Utterance,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Routes controller logs through the test harness; set RUST_LOG to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn voice(name: &str, lang: &str, local: bool) -> HostVoice {
    HostVoice {
        id: name.to_lowercase().replace(' ', "-"),
        name: name.to_string(),
        lang: lang.to_string(),
        local_service: local,
        default: false,
    }
}

/// A small but realistic desktop inventory.
pub fn desktop_voices() -> Vec<HostVoice> {
    vec![
        voice("Google US English", "en-US", false),
        voice("Microsoft Zira Desktop", "en-US", true),
        voice("Daniel", "en-GB", true),
        voice("Google हिन्दी", "hi-IN", false),
    ]
}

/// Host whose inventory is scripted per `list_voices` call and whose
/// utterances are driven by hand through [`FakeBackend::emit`].
pub struct FakeBackend {
    supported: bool,
    scripted: Mutex<VecDeque<Vec<HostVoice>>>,
    voices: Mutex<Vec<HostVoice>>,
    sink: Mutex<Option<EventSink>>,
    spoken: Mutex<Vec<Utterance>>,
    speak_fails: Mutex<bool>,
    changes: broadcast::Sender<()>,
    list_calls: AtomicUsize,
    refresh_requests: AtomicUsize,
    cancels: AtomicUsize,
}

impl FakeBackend {
    pub fn new(voices: Vec<HostVoice>) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            supported: true,
            scripted: Mutex::new(VecDeque::new()),
            voices: Mutex::new(voices),
            sink: Mutex::new(None),
            spoken: Mutex::new(Vec::new()),
            speak_fails: Mutex::new(false),
            changes,
            list_calls: AtomicUsize::new(0),
            refresh_requests: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
        }
    }

    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new(Vec::new())
        }
    }

    /// The next `results.len()` listings return these, in order. After that
    /// the steady inventory applies.
    pub fn script(&self, results: Vec<Vec<HostVoice>>) {
        self.scripted.lock().unwrap().extend(results);
    }

    pub fn set_voices(&self, voices: Vec<HostVoice>) {
        *self.voices.lock().unwrap() = voices;
    }

    pub fn fail_speak(&self, fail: bool) {
        *self.speak_fails.lock().unwrap() = fail;
    }

    /// Announces an inventory change the way a host does when voices load late.
    pub fn notify_change(&self) {
        let _ = self.changes.send(());
    }

    pub fn emit(&self, utterance: u64, kind: SynthesisEventKind) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            let _ = sink.send(SynthesisEvent { utterance, kind });
        }
    }

    pub fn spoken(&self) -> Vec<Utterance> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_requests(&self) -> usize {
        self.refresh_requests.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechBackend for FakeBackend {
    fn id(&self) -> &'static str {
        "fake"
    }

    async fn is_supported(&self) -> bool {
        self.supported
    }

    async fn list_voices(&self) -> Vec<HostVoice> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = self.scripted.lock().unwrap().pop_front() {
            return next;
        }
        self.voices.lock().unwrap().clone()
    }

    fn subscribe_inventory(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }

    fn request_inventory_refresh(&self) {
        self.refresh_requests.fetch_add(1, Ordering::SeqCst);
        let _ = self.changes.send(());
    }

    async fn speak(&self, utterance: Utterance, events: EventSink) -> std::io::Result<()> {
        if *self.speak_fails.lock().unwrap() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "synthesizer missing",
            ));
        }
        *self.sink.lock().unwrap() = Some(events);
        self.spoken.lock().unwrap().push(utterance);
        Ok(())
    }

    fn cancel_current(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}
