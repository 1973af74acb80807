//! Playback supervision for one utterance at a time.
//!
//! Like discovery, the controller is a task that owns the live session and is
//! driven from a single `select!` loop over commands, host callbacks and the
//! session's safety timer. Host callbacks carry the utterance id; anything
//! addressed to an utterance that is no longer current is dropped.

use crate::backends::{
    HostVoice, SpeechBackend, SynthesisErrorKind, SynthesisEvent, SynthesisEventKind, Utterance,
};
use crate::catalog::PresetVoice;
use crate::discovery::DiscoverySnapshot;
use crate::error::{SpeechError, SpeechResult};
use crate::matcher;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackConfig {
    /// Pause between cancelling the host and issuing the next utterance
    pub settle_delay: Duration,
    pub min_timeout: Duration,
    pub timeout_per_char: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(100),
            min_timeout: Duration::from_millis(10_000),
            timeout_per_char: Duration::from_millis(100),
        }
    }
}

/// `max(min_timeout, chars * timeout_per_char)`
pub fn safety_timeout(config: &PlaybackConfig, text: &str) -> Duration {
    let chars = text.chars().count() as u32;
    config.min_timeout.max(config.timeout_per_char * chars)
}

/// Hindi host voices degrade at high rates and pitches, so both are damped
/// with a floor. Everything else passes through.
pub fn shape_parameters(
    target: &PresetVoice,
    rate: f32,
    pitch: f32,
    volume: f32,
) -> (f32, f32, f32) {
    if target.is_hindi() {
        ((rate * 0.85).max(0.6), (pitch * 0.9).max(0.8), volume)
    } else {
        (rate, pitch, volume)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackPhase {
    Idle,
    Preparing,
    Speaking,
    Paused,
    Ending,
    Errored,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct PlaybackRequest {
    pub text: String,
    pub voice: &'static PresetVoice,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

impl PlaybackRequest {
    pub fn new(text: impl Into<String>, voice: &'static PresetVoice) -> Self {
        Self {
            text: text.into(),
            voice,
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
        }
    }

    pub fn with_params(mut self, rate: f32, pitch: f32, volume: f32) -> Self {
        self.rate = rate;
        self.pitch = pitch;
        self.volume = volume;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayOutcome {
    /// A new utterance was handed to the host
    Started { utterance: u64, voice: HostVoice },
    /// The call stopped the utterance that was already speaking
    Stopped,
}

/// Status events for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Preparing { utterance: u64, voice: String },
    Started { utterance: u64, voice: String },
    Paused { utterance: u64 },
    Resumed { utterance: u64 },
    Finished { utterance: u64 },
    Failed { utterance: u64, kind: SynthesisErrorKind },
    TimedOut { utterance: u64 },
    Cancelled { utterance: u64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaybackSnapshot {
    pub phase: PlaybackPhase,
    pub utterance: Option<u64>,
    pub voice: Option<String>,
    pub status: String,
    pub last_error: Option<String>,
    pub last_successful_voice: Option<HostVoice>,
}

impl Default for PlaybackSnapshot {
    fn default() -> Self {
        Self {
            phase: PlaybackPhase::Idle,
            utterance: None,
            voice: None,
            status: "Idle".to_string(),
            last_error: None,
            last_successful_voice: None,
        }
    }
}

struct PlaybackSession {
    id: u64,
    text: String,
    voice: HostVoice,
    rate: f32,
    pitch: f32,
    volume: f32,
    phase: PlaybackPhase,
    deadline: Instant,
}

enum PlaybackCommand {
    Play(PlaybackRequest, oneshot::Sender<SpeechResult<PlayOutcome>>),
    Stop(oneshot::Sender<bool>),
    Reset(oneshot::Sender<()>),
    Shutdown,
}

pub struct PlaybackController {
    backend: Arc<dyn SpeechBackend>,
    discovery: watch::Receiver<Arc<DiscoverySnapshot>>,
    config: PlaybackConfig,
    session: Option<PlaybackSession>,
    last_successful: Option<HostVoice>,
    next_id: u64,
    host_tx: mpsc::UnboundedSender<SynthesisEvent>,
    host_rx: mpsc::UnboundedReceiver<SynthesisEvent>,
    state_tx: watch::Sender<PlaybackSnapshot>,
    events: broadcast::Sender<PlaybackEvent>,
}

impl PlaybackController {
    pub fn new(
        backend: Arc<dyn SpeechBackend>,
        discovery: watch::Receiver<Arc<DiscoverySnapshot>>,
        config: PlaybackConfig,
    ) -> Self {
        let (host_tx, host_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(PlaybackSnapshot::default());
        let (events, _) = broadcast::channel(64);
        Self {
            backend,
            discovery,
            config,
            session: None,
            last_successful: None,
            next_id: 1,
            host_tx,
            host_rx,
            state_tx,
            events,
        }
    }

    pub fn spawn(self) -> PlaybackHandle {
        let (commands, rx) = mpsc::channel(16);
        let state = self.state_tx.subscribe();
        let events = self.events.clone();
        let backend = self.backend.clone();
        let task = tokio::spawn(self.run(rx));
        PlaybackHandle {
            commands,
            state,
            events,
            backend,
            task: Some(task),
        }
    }

    fn emit(&self, event: PlaybackEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn publish(&self, f: impl FnOnce(&mut PlaybackSnapshot)) {
        self.state_tx.send_modify(f);
    }

    fn ready_status(&self) -> String {
        format!(
            "Ready - {} voices loaded",
            self.discovery.borrow().inventory.len()
        )
    }

    async fn run(mut self, mut commands: mpsc::Receiver<PlaybackCommand>) {
        loop {
            let deadline = self.session.as_ref().map(|s| s.deadline);
            let timer = async move {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = timer => self.on_timeout(),

                Some(event) = self.host_rx.recv() => self.on_host_event(event),

                command = commands.recv() => match command {
                    Some(PlaybackCommand::Play(request, reply)) => {
                        let result = self.play(request).await;
                        if let Err(e) = &result {
                            self.record_error(e);
                        }
                        let _ = reply.send(result);
                    }
                    Some(PlaybackCommand::Stop(reply)) => {
                        let stopped = self.cancel_session();
                        let _ = reply.send(stopped);
                    }
                    Some(PlaybackCommand::Reset(reply)) => {
                        self.cancel_session();
                        self.last_successful = None;
                        self.publish(|s| *s = PlaybackSnapshot::default());
                        let _ = reply.send(());
                    }
                    Some(PlaybackCommand::Shutdown) | None => {
                        self.cancel_session();
                        break;
                    }
                },
            }
        }
        debug!("Playback controller stopped");
    }

    /// Starts speaking `request`, or stops the current utterance if one is
    /// already speaking.
    async fn play(&mut self, request: PlaybackRequest) -> SpeechResult<PlayOutcome> {
        info!(voice = request.voice.id, "Play requested");

        if request.text.trim().is_empty() {
            return Err(SpeechError::EmptyInput);
        }

        let discovery = self.discovery.borrow().clone();
        if !discovery.voices_loaded {
            return Err(SpeechError::VoicesNotReady);
        }

        if matches!(
            self.session.as_ref().map(|s| s.phase),
            Some(PlaybackPhase::Speaking) | Some(PlaybackPhase::Paused)
        ) {
            info!("Stopping current speech");
            self.cancel_session();
            return Ok(PlayOutcome::Stopped);
        }

        let voice = self
            .resolve_voice(&discovery, request.voice)
            .ok_or(SpeechError::NoVoiceAvailable)?;
        info!(voice = %voice.name, lang = %voice.lang, "Using voice");

        // A session still waiting for the host to start is superseded
        if let Some(old) = self.session.take() {
            debug!(utterance = old.id, "Superseding unstarted utterance");
            self.emit(PlaybackEvent::Cancelled { utterance: old.id });
        }

        let id = self.next_id;
        self.next_id += 1;
        self.publish(|s| {
            s.phase = PlaybackPhase::Preparing;
            s.utterance = Some(id);
            s.voice = Some(voice.name.clone());
            s.status = "Preparing speech...".to_string();
            s.last_error = None;
        });
        self.emit(PlaybackEvent::Preparing {
            utterance: id,
            voice: voice.name.clone(),
        });

        // The host only runs one utterance; clear it and let it settle
        self.backend.cancel_current();
        sleep(self.config.settle_delay).await;

        let (rate, pitch, volume) =
            shape_parameters(request.voice, request.rate, request.pitch, request.volume);
        let utterance = Utterance {
            id,
            text: request.text.clone(),
            voice: voice.clone(),
            rate,
            pitch,
            volume,
        };

        if let Err(e) = self.backend.speak(utterance, self.host_tx.clone()).await {
            error!(utterance = id, error = %e, "Host refused utterance");
            self.publish(|s| {
                s.phase = PlaybackPhase::Errored;
            });
            self.publish(|s| {
                s.phase = PlaybackPhase::Idle;
                s.utterance = None;
                s.voice = None;
            });
            return Err(SpeechError::Io(e));
        }

        let timeout = safety_timeout(&self.config, &request.text);
        debug!(utterance = id, timeout_ms = timeout.as_millis() as u64, "Safety timer armed");
        self.session = Some(PlaybackSession {
            id,
            text: request.text,
            voice: voice.clone(),
            rate,
            pitch,
            volume,
            phase: PlaybackPhase::Preparing,
            deadline: Instant::now() + timeout,
        });

        Ok(PlayOutcome::Started {
            utterance: id,
            voice,
        })
    }

    /// Mapped voice, then a fresh match, then the last voice that worked,
    /// then whatever the host lists first.
    fn resolve_voice(
        &self,
        discovery: &DiscoverySnapshot,
        target: &PresetVoice,
    ) -> Option<HostVoice> {
        discovery
            .binding(target.id)
            .filter(|b| b.is_available)
            .map(|b| b.host_voice.clone())
            .or_else(|| matcher::best_match(&discovery.inventory, target).cloned())
            .or_else(|| self.last_successful.clone())
            .or_else(|| discovery.inventory.first().cloned())
    }

    fn on_host_event(&mut self, event: SynthesisEvent) {
        let Some(session) = self.session.as_mut() else {
            debug!(utterance = event.utterance, "Host event with no active session");
            return;
        };
        if session.id != event.utterance {
            debug!(utterance = event.utterance, current = session.id, "Ignoring stale host event");
            return;
        }
        let id = session.id;

        match event.kind {
            SynthesisEventKind::Start => {
                info!(utterance = id, "Speech started");
                session.phase = PlaybackPhase::Speaking;
                let voice = session.voice.clone();
                self.last_successful = Some(voice.clone());
                self.publish(|s| {
                    s.phase = PlaybackPhase::Speaking;
                    s.status = "Speaking...".to_string();
                    s.last_error = None;
                    s.last_successful_voice = Some(voice.clone());
                });
                self.emit(PlaybackEvent::Started {
                    utterance: id,
                    voice: voice.name,
                });
            }
            SynthesisEventKind::Pause => {
                if session.phase == PlaybackPhase::Speaking {
                    debug!(utterance = id, "Speech paused");
                    session.phase = PlaybackPhase::Paused;
                    self.publish(|s| {
                        s.phase = PlaybackPhase::Paused;
                        s.status = "Paused".to_string();
                    });
                    self.emit(PlaybackEvent::Paused { utterance: id });
                }
            }
            SynthesisEventKind::Resume => {
                if session.phase == PlaybackPhase::Paused {
                    debug!(utterance = id, "Speech resumed");
                    session.phase = PlaybackPhase::Speaking;
                    self.publish(|s| {
                        s.phase = PlaybackPhase::Speaking;
                        s.status = "Speaking...".to_string();
                    });
                    self.emit(PlaybackEvent::Resumed { utterance: id });
                }
            }
            SynthesisEventKind::End => {
                info!(utterance = id, "Speech completed");
                let status = self.ready_status();
                self.finish(PlaybackPhase::Ending, status, None);
                self.emit(PlaybackEvent::Finished { utterance: id });
            }
            SynthesisEventKind::Error(kind) => {
                error!(utterance = id, code = %kind, "Speech error");
                let message = SpeechError::Synthesis(kind.clone()).user_message();
                self.finish(PlaybackPhase::Errored, "Error occurred".to_string(), Some(message));
                self.emit(PlaybackEvent::Failed { utterance: id, kind });
            }
        }
    }

    fn on_timeout(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let id = session.id;
        warn!(
            utterance = id,
            chars = session.text.chars().count(),
            "Speech timeout - forcing stop"
        );
        self.backend.cancel_current();
        self.finish(
            PlaybackPhase::TimedOut,
            "Timeout occurred".to_string(),
            Some(SpeechError::SynthesisTimeout.user_message()),
        );
        self.emit(PlaybackEvent::TimedOut { utterance: id });
    }

    /// Passes through the terminal `phase` and lands back on `Idle`,
    /// dropping the session and its timer.
    fn finish(&mut self, phase: PlaybackPhase, status: String, error: Option<String>) {
        if let Some(session) = self.session.take() {
            debug!(
                utterance = session.id,
                rate = session.rate,
                pitch = session.pitch,
                volume = session.volume,
                ?phase,
                "Session closed"
            );
        }
        self.publish(|s| s.phase = phase);
        self.publish(|s| {
            s.phase = PlaybackPhase::Idle;
            s.utterance = None;
            s.voice = None;
            s.status = status;
            if error.is_some() {
                s.last_error = error;
            }
        });
    }

    /// Force-cancels the live session, if any. Returns whether there was one.
    fn cancel_session(&mut self) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        info!(utterance = session.id, "Cancelling speech");
        self.backend.cancel_current();
        let status = self.ready_status();
        self.publish(|s| {
            s.phase = PlaybackPhase::Idle;
            s.utterance = None;
            s.voice = None;
            s.status = status;
        });
        self.emit(PlaybackEvent::Cancelled {
            utterance: session.id,
        });
        true
    }

    fn record_error(&self, err: &SpeechError) {
        warn!(error = %err, "Play request rejected");
        let message = err.user_message();
        self.publish(|s| {
            s.last_error = Some(message);
            s.status = "Error occurred".to_string();
        });
    }
}

/// Owner's handle on the playback task. Dropping it cancels whatever the
/// host is speaking and stops the task.
pub struct PlaybackHandle {
    commands: mpsc::Sender<PlaybackCommand>,
    state: watch::Receiver<PlaybackSnapshot>,
    events: broadcast::Sender<PlaybackEvent>,
    backend: Arc<dyn SpeechBackend>,
    task: Option<JoinHandle<()>>,
}

impl PlaybackHandle {
    pub async fn play(&self, request: PlaybackRequest) -> SpeechResult<PlayOutcome> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(PlaybackCommand::Play(request, tx))
            .await
            .map_err(|_| SpeechError::ControllerClosed)?;
        rx.await.map_err(|_| SpeechError::ControllerClosed)?
    }

    /// Stops the current utterance. Returns `false` if nothing was playing.
    pub async fn stop(&self) -> SpeechResult<bool> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(PlaybackCommand::Stop(tx))
            .await
            .map_err(|_| SpeechError::ControllerClosed)?;
        rx.await.map_err(|_| SpeechError::ControllerClosed)
    }

    /// Stops playback and forgets the last voice that worked.
    pub async fn reset(&self) -> SpeechResult<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(PlaybackCommand::Reset(tx))
            .await
            .map_err(|_| SpeechError::ControllerClosed)?;
        rx.await.map_err(|_| SpeechError::ControllerClosed)
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.state.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    pub async fn shutdown(&mut self) {
        let _ = self.commands.send(PlaybackCommand::Shutdown).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            if self.state.borrow().phase != PlaybackPhase::Idle {
                self.backend.cancel_current();
            }
        }
    }
}

/// Waits for `utterance` to reach a terminal phase.
/// A cancelled utterance counts as done.
pub async fn await_completion(
    events: &mut broadcast::Receiver<PlaybackEvent>,
    utterance: u64,
) -> SpeechResult<()> {
    loop {
        match events.recv().await {
            Ok(PlaybackEvent::Finished { utterance: u })
            | Ok(PlaybackEvent::Cancelled { utterance: u })
                if u == utterance =>
            {
                return Ok(())
            }
            Ok(PlaybackEvent::Failed { utterance: u, kind }) if u == utterance => {
                return Err(SpeechError::Synthesis(kind))
            }
            Ok(PlaybackEvent::TimedOut { utterance: u }) if u == utterance => {
                return Err(SpeechError::SynthesisTimeout)
            }
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return Err(SpeechError::ControllerClosed),
        }
    }
}
