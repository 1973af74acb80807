pub mod espeak;

use crate::config_loader::Settings;
use crate::error::{SpeechError, SpeechResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// A concrete voice as reported by the host speech engine.
///
/// Identity is only meaningful within one discovery pass; a later listing may
/// return different instances for what looks like the same voice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostVoice {
    /// Host specific handle passed back to `speak`
    pub id: String,
    pub name: String,
    pub lang: String,
    /// Synthesised on-device rather than by a remote service
    pub local_service: bool,
    pub default: bool,
}

/// One synthesis request handed to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: u64,
    pub text: String,
    pub voice: HostVoice,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

/// Error codes a host may report for an utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisErrorKind {
    Network,
    SynthesisFailed,
    SynthesisUnavailable,
    AudioBusy,
    NotAllowed,
    Interrupted,
    Unknown(String),
}

impl SynthesisErrorKind {
    pub fn from_code(code: &str) -> Self {
        match code {
            "network" => Self::Network,
            "synthesis-failed" => Self::SynthesisFailed,
            "synthesis-unavailable" => Self::SynthesisUnavailable,
            "audio-busy" => Self::AudioBusy,
            "not-allowed" => Self::NotAllowed,
            "interrupted" => Self::Interrupted,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Network => "network",
            Self::SynthesisFailed => "synthesis-failed",
            Self::SynthesisUnavailable => "synthesis-unavailable",
            Self::AudioBusy => "audio-busy",
            Self::NotAllowed => "not-allowed",
            Self::Interrupted => "interrupted",
            Self::Unknown(code) => code,
        }
    }

    pub fn guidance(&self) -> String {
        match self {
            Self::Network => {
                "Network error. Please check your connection and try again.".to_string()
            }
            Self::SynthesisFailed => {
                "Voice synthesis failed. Try selecting a different voice.".to_string()
            }
            Self::SynthesisUnavailable => {
                "Voice synthesis unavailable. Please reload the voices.".to_string()
            }
            Self::AudioBusy => "Audio system is busy. Please wait and try again.".to_string(),
            Self::NotAllowed => "Audio not allowed. Please check audio permissions.".to_string(),
            Self::Interrupted => "Speech was interrupted. Please try again.".to_string(),
            Self::Unknown(code) => format!(
                "Unknown error ({}). Please try again or select a different voice.",
                code
            ),
        }
    }
}

impl fmt::Display for SynthesisErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisEventKind {
    Start,
    End,
    Error(SynthesisErrorKind),
    Pause,
    Resume,
}

/// Lifecycle callback for the utterance with the given id.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisEvent {
    pub utterance: u64,
    pub kind: SynthesisEventKind,
}

pub type EventSink = mpsc::UnboundedSender<SynthesisEvent>;

/// Trait that all host speech engines must implement.
/// Covers both the voice query capability and the synthesis capability;
/// the host is treated as a singleton that runs one utterance at a time.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Returns the unique ID of the backend (e.g., "espeak-ng")
    fn id(&self) -> &'static str;

    /// Whether the host offers speech synthesis at all
    async fn is_supported(&self) -> bool;

    /// Current voice inventory. May be empty while the host is still loading.
    async fn list_voices(&self) -> Vec<HostVoice>;

    /// Fires whenever the host's inventory may have changed
    fn subscribe_inventory(&self) -> broadcast::Receiver<()>;

    /// Best-effort nudge asking the host to re-read its inventory
    fn request_inventory_refresh(&self);

    /// Starts synthesis. Lifecycle callbacks for `utterance.id` arrive on `events`.
    async fn speak(&self, utterance: Utterance, events: EventSink) -> std::io::Result<()>;

    /// Cancels whatever utterance is in flight. No-op when idle.
    fn cancel_current(&self);
}

pub fn create_backend(settings: &Settings) -> SpeechResult<Arc<dyn SpeechBackend>> {
    match settings.backend.as_str() {
        "espeak" | "espeak-ng" => Ok(Arc::new(espeak::EspeakBackend::new(
            settings.espeak_binary.clone(),
        ))),
        other => Err(SpeechError::Config(format!("Unknown backend: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_map_both_ways() {
        for code in [
            "network",
            "synthesis-failed",
            "synthesis-unavailable",
            "audio-busy",
            "not-allowed",
            "interrupted",
        ] {
            let kind = SynthesisErrorKind::from_code(code);
            assert!(!matches!(kind, SynthesisErrorKind::Unknown(_)));
            assert_eq!(kind.code(), code);
        }
        assert_eq!(
            SynthesisErrorKind::from_code("canceled"),
            SynthesisErrorKind::Unknown("canceled".into())
        );
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let settings = Settings {
            backend: "sapi".to_string(),
            ..Settings::default()
        };
        assert!(matches!(
            create_backend(&settings),
            Err(SpeechError::Config(_))
        ));
    }
}
