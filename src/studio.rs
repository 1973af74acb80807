//! Entry point for a front end: owns both controllers plus the editor state
//! (current text, selected preset, speech parameters).

use crate::backends::SpeechBackend;
use crate::catalog::{default_preset, PresetVoice};
use crate::config_loader::Settings;
use crate::discovery::{DiscoveryController, DiscoveryHandle, DiscoverySnapshot};
use crate::error::{SpeechError, SpeechResult};
use crate::playback::{
    PlayOutcome, PlaybackController, PlaybackEvent, PlaybackHandle, PlaybackPhase,
    PlaybackRequest, PlaybackSnapshot,
};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info};

const TEST_START_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
struct EditorState {
    text: String,
    selected: &'static PresetVoice,
    rate: f32,
    pitch: f32,
    volume: f32,
}

/// Combined view for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct StudioStatus {
    pub discovery: Arc<DiscoverySnapshot>,
    pub playback: PlaybackSnapshot,
    pub selected_voice: &'static str,
}

impl StudioStatus {
    /// The line a status bar would show.
    pub fn headline(&self) -> &str {
        if self.playback.phase != PlaybackPhase::Idle || self.playback.last_error.is_some() {
            &self.playback.status
        } else {
            &self.discovery.status
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.playback
            .last_error
            .as_deref()
            .or(self.discovery.error.as_deref())
    }
}

pub struct Studio {
    discovery: DiscoveryHandle,
    playback: PlaybackHandle,
    editor: Arc<Mutex<EditorState>>,
    restore_delay: Duration,
    pending_restore: Mutex<Option<JoinHandle<()>>>,
}

impl Studio {
    /// Spawns discovery and playback on the current runtime.
    pub fn start(backend: Arc<dyn SpeechBackend>, settings: &Settings) -> Self {
        let discovery = DiscoveryController::new(backend.clone(), settings.discovery_config());
        let discovery_rx = discovery.subscribe();
        let discovery = discovery.spawn();
        let playback =
            PlaybackController::new(backend, discovery_rx, settings.playback_config()).spawn();

        info!(backend = %settings.backend, "Studio started");
        Self {
            discovery,
            playback,
            editor: Arc::new(Mutex::new(EditorState {
                text: String::new(),
                selected: default_preset(),
                rate: settings.default_rate,
                pitch: settings.default_pitch,
                volume: settings.default_volume,
            })),
            restore_delay: Duration::from_millis(settings.test_restore_delay_ms),
            pending_restore: Mutex::new(None),
        }
    }

    pub fn set_text(&self, text: impl Into<String>) {
        if let Ok(mut editor) = self.editor.lock() {
            editor.text = text.into();
        }
    }

    pub fn text(&self) -> String {
        self.editor
            .lock()
            .map(|e| e.text.clone())
            .unwrap_or_default()
    }

    pub fn select_voice(&self, voice: &'static PresetVoice) {
        if let Ok(mut editor) = self.editor.lock() {
            editor.selected = voice;
        }
    }

    pub fn selected_voice(&self) -> &'static PresetVoice {
        self.editor
            .lock()
            .map(|e| e.selected)
            .unwrap_or_else(|_| default_preset())
    }

    pub fn set_params(&self, rate: f32, pitch: f32, volume: f32) {
        if let Ok(mut editor) = self.editor.lock() {
            editor.rate = rate;
            editor.pitch = pitch;
            editor.volume = volume;
        }
    }

    fn current_request(&self) -> PlaybackRequest {
        match self.editor.lock() {
            Ok(e) => PlaybackRequest::new(e.text.clone(), e.selected)
                .with_params(e.rate, e.pitch, e.volume),
            Err(_) => PlaybackRequest::new(String::new(), default_preset()),
        }
    }

    /// Plays the editor text with the selected voice, or stops the
    /// utterance that is already speaking.
    pub async fn play(&self) -> SpeechResult<PlayOutcome> {
        self.playback.play(self.current_request()).await
    }

    pub async fn stop(&self) -> SpeechResult<bool> {
        self.playback.stop().await
    }

    /// Auditions `voice` with its test phrase, then puts the previous text
    /// back once the restore delay has passed.
    pub async fn test_voice(&self, voice: &'static PresetVoice) -> SpeechResult<PlayOutcome> {
        let original = self.text();
        self.set_text(voice.test_phrase());
        self.select_voice(voice);
        debug!(voice = voice.id, "Testing voice");

        sleep(TEST_START_DELAY).await;
        let result = self.play().await;

        let editor = self.editor.clone();
        let delay = self.restore_delay;
        let restore = tokio::spawn(async move {
            sleep(delay).await;
            if let Ok(mut e) = editor.lock() {
                e.text = original;
            }
        });
        if let Ok(mut pending) = self.pending_restore.lock() {
            if let Some(previous) = pending.replace(restore) {
                previous.abort();
            }
        }

        result
    }

    /// Runs a discovery probe immediately.
    pub async fn discover(&self) -> SpeechResult<usize> {
        self.discovery.discover().await
    }

    /// Stops playback, forgets everything learned about the host and
    /// starts discovery from scratch.
    pub async fn reload(&self) -> SpeechResult<()> {
        self.playback.reset().await?;
        self.discovery.reload().await
    }

    /// Saving audio to a file is not offered; this always explains why.
    pub fn download_audio(&self) -> SpeechResult<()> {
        if self.text().trim().is_empty() {
            return Err(SpeechError::EmptyInput);
        }
        Err(SpeechError::DownloadUnsupported)
    }

    pub async fn wait_until_ready(&self) -> SpeechResult<Arc<DiscoverySnapshot>> {
        self.discovery.wait_until_settled().await
    }

    pub fn discovery_snapshot(&self) -> Arc<DiscoverySnapshot> {
        self.discovery.snapshot()
    }

    pub fn playback_snapshot(&self) -> PlaybackSnapshot {
        self.playback.snapshot()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.playback.subscribe_events()
    }

    pub fn status(&self) -> StudioStatus {
        StudioStatus {
            discovery: self.discovery.snapshot(),
            playback: self.playback.snapshot(),
            selected_voice: self.selected_voice().id,
        }
    }

    fn cancel_restore(&self) {
        if let Ok(mut pending) = self.pending_restore.lock() {
            if let Some(restore) = pending.take() {
                restore.abort();
            }
        }
    }

    pub async fn shutdown(mut self) {
        self.cancel_restore();
        self.playback.shutdown().await;
        self.discovery.shutdown().await;
    }
}

impl Drop for Studio {
    fn drop(&mut self) {
        self.cancel_restore();
    }
}
