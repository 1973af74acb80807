//! Voice discovery: probes the host until a usable inventory shows up, then
//! maps every preset onto its best host voice.
//!
//! The controller runs as a single task. Retries, host change notifications
//! and commands from the handle are all dispatched from one `select!` loop, so
//! state only ever moves through that loop. Readers get `Arc` snapshots
//! through a `watch` channel and never observe a half-built mapping.

use crate::backends::{HostVoice, SpeechBackend};
use crate::catalog::{PresetVoice, PRESET_VOICES};
use crate::error::{SpeechError, SpeechResult};
use crate::matcher;
use crate::quality::{self, VoiceQuality};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryConfig {
    /// Failed attempts allowed before giving up
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_factor: f64,
    pub backoff_cap: Duration,
    /// Wait after the cancel-and-requery nudge
    pub refresh_delay: Duration,
    /// Wait after announcing an inventory change
    pub notify_delay: Duration,
    pub reload_delay: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 20,
            backoff_base: Duration::from_millis(500),
            backoff_factor: 1.3,
            backoff_cap: Duration::from_millis(3000),
            refresh_delay: Duration::from_millis(100),
            notify_delay: Duration::from_millis(200),
            reload_delay: Duration::from_millis(100),
        }
    }
}

/// `min(base * factor^retry_count, cap)`
pub fn backoff_delay(config: &DiscoveryConfig, retry_count: u32) -> Duration {
    let base = config.backoff_base.as_millis() as f64;
    let cap = config.backoff_cap.as_millis() as f64;
    let ms = (base * config.backoff_factor.powi(retry_count as i32)).min(cap);
    Duration::from_millis(ms as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    UnsupportedHost,
    DiscoveryExhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DiscoveryState {
    Idle,
    Probing { attempt: u32 },
    Ready { inventory_size: usize },
    Failed { reason: FailureReason },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceBinding {
    pub host_voice: HostVoice,
    pub is_available: bool,
    pub quality: VoiceQuality,
}

/// Preset id -> binding. Presets without a match are absent.
pub type VoiceMapping = BTreeMap<String, VoiceBinding>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InventoryStats {
    pub total: usize,
    pub english: usize,
    pub hindi: usize,
    pub local: usize,
    pub remote: usize,
}

impl InventoryStats {
    pub fn from_voices(voices: &[HostVoice]) -> Self {
        let hindi = voices
            .iter()
            .filter(|v| {
                let name = v.name.to_lowercase();
                v.lang.to_lowercase().contains("hi")
                    || name.contains("hindi")
                    || name.contains("devanagari")
            })
            .count();
        let local = voices.iter().filter(|v| v.local_service).count();
        Self {
            total: voices.len(),
            english: voices
                .iter()
                .filter(|v| v.lang.to_lowercase().starts_with("en"))
                .count(),
            hindi,
            local,
            remote: voices.len() - local,
        }
    }
}

/// Everything the presentation layer may read about discovery.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoverySnapshot {
    pub state: DiscoveryState,
    pub retry_count: u32,
    /// Whether a discovery pass has succeeded since start or the last reload
    pub voices_loaded: bool,
    pub inventory: Arc<Vec<HostVoice>>,
    pub mapping: Arc<VoiceMapping>,
    pub stats: InventoryStats,
    pub status: String,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for DiscoverySnapshot {
    fn default() -> Self {
        Self {
            state: DiscoveryState::Idle,
            retry_count: 0,
            voices_loaded: false,
            inventory: Arc::new(Vec::new()),
            mapping: Arc::new(VoiceMapping::new()),
            stats: InventoryStats::default(),
            status: "Initializing...".to_string(),
            error: None,
            updated_at: Utc::now(),
        }
    }
}

impl DiscoverySnapshot {
    pub fn binding(&self, preset_id: &str) -> Option<&VoiceBinding> {
        self.mapping.get(preset_id)
    }

    /// The failure as an error value, if discovery has given up.
    pub fn failure(&self) -> Option<SpeechError> {
        match self.state {
            DiscoveryState::Failed {
                reason: FailureReason::UnsupportedHost,
            } => Some(SpeechError::UnsupportedHost),
            DiscoveryState::Failed {
                reason: FailureReason::DiscoveryExhausted,
            } => Some(SpeechError::DiscoveryExhausted {
                attempts: self.retry_count,
            }),
            _ => None,
        }
    }
}

/// Matches every preset against `inventory`.
pub fn build_mapping(inventory: &[HostVoice], presets: &[PresetVoice]) -> VoiceMapping {
    let mut mapping = VoiceMapping::new();
    for preset in presets {
        match matcher::best_match(inventory, preset) {
            Some(voice) => {
                info!(preset = preset.name, voice = %voice.name, lang = %voice.lang, "Mapped");
                mapping.insert(
                    preset.id.to_string(),
                    VoiceBinding {
                        host_voice: voice.clone(),
                        is_available: true,
                        quality: quality::assess(voice),
                    },
                );
            }
            None => info!(preset = preset.name, "No mapping found"),
        }
    }
    mapping
}

enum DiscoveryCommand {
    Discover(oneshot::Sender<SpeechResult<usize>>),
    Reload(oneshot::Sender<()>),
    Shutdown,
}

pub struct DiscoveryController {
    backend: Arc<dyn SpeechBackend>,
    config: DiscoveryConfig,
    state_tx: watch::Sender<Arc<DiscoverySnapshot>>,
}

impl DiscoveryController {
    pub fn new(backend: Arc<dyn SpeechBackend>, config: DiscoveryConfig) -> Self {
        let (state_tx, _) = watch::channel(Arc::new(DiscoverySnapshot::default()));
        Self {
            backend,
            config,
            state_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DiscoverySnapshot>> {
        self.state_tx.subscribe()
    }

    pub fn snapshot(&self) -> Arc<DiscoverySnapshot> {
        self.state_tx.borrow().clone()
    }

    fn update(&self, f: impl FnOnce(&mut DiscoverySnapshot)) {
        let mut next = (**self.state_tx.borrow()).clone();
        f(&mut next);
        next.updated_at = Utc::now();
        self.state_tx.send_replace(Arc::new(next));
    }

    /// One probe cycle. On success the new inventory and mapping are published
    /// together and the state becomes `Ready`; an empty host yields
    /// `NoVoicesFound` and leaves the published state alone.
    pub async fn discover(&self) -> SpeechResult<usize> {
        let mut voices = self.backend.list_voices().await;

        if voices.is_empty() {
            debug!("No voices found, forcing refresh");
            self.backend.cancel_current();
            sleep(self.config.refresh_delay).await;
            voices = self.backend.list_voices().await;
        }

        if voices.is_empty() {
            debug!("Announcing inventory change");
            self.backend.request_inventory_refresh();
            sleep(self.config.notify_delay).await;
            voices = self.backend.list_voices().await;
        }

        info!(count = voices.len(), backend = self.backend.id(), "Host voices found");
        if voices.is_empty() {
            return Err(SpeechError::NoVoicesFound);
        }

        let mapping = build_mapping(&voices, &PRESET_VOICES);
        let stats = InventoryStats::from_voices(&voices);
        info!(
            total = stats.total,
            english = stats.english,
            hindi = stats.hindi,
            local = stats.local,
            remote = stats.remote,
            mapped = mapping.len(),
            "Voice statistics"
        );

        let count = voices.len();
        self.update(|s| {
            s.state = DiscoveryState::Ready {
                inventory_size: count,
            };
            s.retry_count = 0;
            s.voices_loaded = true;
            s.inventory = Arc::new(voices);
            s.mapping = Arc::new(mapping);
            s.stats = stats;
            s.status = format!("Ready - {} voices loaded", count);
            s.error = None;
        });
        Ok(count)
    }

    /// Starts the retry loop on the current runtime.
    pub fn spawn(self) -> DiscoveryHandle {
        let (commands, rx) = mpsc::channel(16);
        let state = self.subscribe();
        let task = tokio::spawn(self.run(rx));
        DiscoveryHandle {
            commands,
            state,
            task: Some(task),
        }
    }

    fn is_unsupported(&self) -> bool {
        matches!(
            self.state_tx.borrow().state,
            DiscoveryState::Failed {
                reason: FailureReason::UnsupportedHost
            }
        )
    }

    async fn check_support(&self) -> bool {
        if self.backend.is_supported().await {
            return true;
        }
        error!(backend = self.backend.id(), "Host has no speech synthesis");
        self.update(|s| {
            s.state = DiscoveryState::Failed {
                reason: FailureReason::UnsupportedHost,
            };
            s.status = "Not supported".to_string();
            s.error = Some(SpeechError::UnsupportedHost.user_message());
        });
        false
    }

    async fn run(self, mut commands: mpsc::Receiver<DiscoveryCommand>) {
        let mut changes = self.backend.subscribe_inventory();
        let mut listening = true;
        let mut retry_count: u32 = 0;
        let mut next_attempt = if self.check_support().await {
            Some(Instant::now())
        } else {
            None
        };

        loop {
            let deadline = next_attempt;
            let timer = async move {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = timer => {
                    next_attempt = None;
                    info!(attempt = retry_count + 1, "Loading voices");
                    self.update(|s| {
                        s.state = DiscoveryState::Probing { attempt: retry_count };
                        s.retry_count = retry_count;
                        s.status = format!("Loading voices (attempt {})...", retry_count + 1);
                    });

                    let result = self.discover().await;
                    drain(&mut changes);

                    match result {
                        Ok(_) => {
                            retry_count = 0;
                            info!("Voice system initialized");
                        }
                        Err(_) => {
                            retry_count += 1;
                            if retry_count >= self.config.max_retries {
                                let err = SpeechError::DiscoveryExhausted { attempts: retry_count };
                                error!(attempts = retry_count, "Giving up on voice discovery");
                                self.update(|s| {
                                    s.state = DiscoveryState::Failed {
                                        reason: FailureReason::DiscoveryExhausted,
                                    };
                                    s.retry_count = retry_count;
                                    s.status = "Failed to load".to_string();
                                    s.error = Some(err.user_message());
                                });
                            } else {
                                let delay = backoff_delay(&self.config, retry_count);
                                debug!(
                                    delay_ms = delay.as_millis() as u64,
                                    "Retrying voice discovery"
                                );
                                self.update(|s| {
                                    s.state = DiscoveryState::Probing { attempt: retry_count };
                                    s.retry_count = retry_count;
                                });
                                next_attempt = Some(Instant::now() + delay);
                            }
                        }
                    }
                }

                change = changes.recv(), if listening => {
                    match change {
                        Ok(()) | Err(RecvError::Lagged(_)) => {
                            // Exhausted discovery still recovers when voices show up late
                            if self.is_unsupported() {
                                debug!("Ignoring inventory change on unsupported host");
                                continue;
                            }
                            info!("Voices changed event received");
                            let result = self.discover().await;
                            drain(&mut changes);
                            match result {
                                Ok(_) => {
                                    retry_count = 0;
                                    next_attempt = None;
                                }
                                Err(_) => debug!("Inventory change carried no voices"),
                            }
                        }
                        Err(RecvError::Closed) => {
                            warn!("Host stopped publishing inventory changes");
                            listening = false;
                        }
                    }
                }

                command = commands.recv() => match command {
                    Some(DiscoveryCommand::Discover(reply)) => {
                        let result = self.discover().await;
                        drain(&mut changes);
                        if result.is_ok() {
                            retry_count = 0;
                            next_attempt = None;
                        }
                        let _ = reply.send(result);
                    }
                    Some(DiscoveryCommand::Reload(reply)) => {
                        info!("Force reloading voice system");
                        retry_count = 0;
                        self.update(|s| {
                            *s = DiscoverySnapshot {
                                status: "Reloading...".to_string(),
                                ..DiscoverySnapshot::default()
                            };
                        });
                        self.backend.request_inventory_refresh();
                        drain(&mut changes);
                        next_attempt = if self.check_support().await {
                            Some(Instant::now() + self.config.reload_delay)
                        } else {
                            None
                        };
                        let _ = reply.send(());
                    }
                    Some(DiscoveryCommand::Shutdown) | None => break,
                },
            }
        }

        debug!("Discovery controller stopped");
    }
}

/// Discards notifications that piled up while a probe was running,
/// including the ones the probe itself announced.
fn drain(changes: &mut broadcast::Receiver<()>) {
    loop {
        match changes.try_recv() {
            Ok(()) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}

/// Owner's handle on a running discovery loop. Dropping it stops the loop,
/// which clears any pending retry and drops the change subscription.
pub struct DiscoveryHandle {
    commands: mpsc::Sender<DiscoveryCommand>,
    state: watch::Receiver<Arc<DiscoverySnapshot>>,
    task: Option<JoinHandle<()>>,
}

impl DiscoveryHandle {
    pub fn snapshot(&self) -> Arc<DiscoverySnapshot> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DiscoverySnapshot>> {
        self.state.clone()
    }

    /// Runs a probe right now, outside the backoff schedule.
    pub async fn discover(&self) -> SpeechResult<usize> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(DiscoveryCommand::Discover(tx))
            .await
            .map_err(|_| SpeechError::ControllerClosed)?;
        rx.await.map_err(|_| SpeechError::ControllerClosed)?
    }

    /// Throws away the inventory and mapping and starts over from attempt one.
    pub async fn reload(&self) -> SpeechResult<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(DiscoveryCommand::Reload(tx))
            .await
            .map_err(|_| SpeechError::ControllerClosed)?;
        rx.await.map_err(|_| SpeechError::ControllerClosed)
    }

    /// Waits until discovery is `Ready` or has failed for good.
    pub async fn wait_until_settled(&self) -> SpeechResult<Arc<DiscoverySnapshot>> {
        let mut state = self.state.clone();
        let snapshot = state
            .wait_for(|s| {
                matches!(
                    s.state,
                    DiscoveryState::Ready { .. } | DiscoveryState::Failed { .. }
                )
            })
            .await
            .map_err(|_| SpeechError::ControllerClosed)?
            .clone();
        match snapshot.failure() {
            Some(err) => Err(err),
            None => Ok(snapshot),
        }
    }

    pub async fn shutdown(&mut self) {
        let _ = self.commands.send(DiscoveryCommand::Shutdown).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for DiscoveryHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
