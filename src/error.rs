//! Error types shared by discovery, playback and the studio facade.

use crate::backends::SynthesisErrorKind;
use thiserror::Error;

/// Result type alias for speech operations
pub type SpeechResult<T> = Result<T, SpeechError>;

#[derive(Error, Debug)]
pub enum SpeechError {
    /// The host has no speech capability at all. Not retryable.
    #[error("speech synthesis is not supported by this host")]
    UnsupportedHost,

    #[error("no voices found after {attempts} attempts")]
    DiscoveryExhausted { attempts: u32 },

    /// A single discovery probe came back empty. Retried internally.
    #[error("no voices found")]
    NoVoicesFound,

    #[error("text is empty")]
    EmptyInput,

    #[error("voices are not loaded yet")]
    VoicesNotReady,

    #[error("no suitable voice available")]
    NoVoiceAvailable,

    #[error("synthesis error: {0}")]
    Synthesis(SynthesisErrorKind),

    #[error("synthesis timed out")]
    SynthesisTimeout,

    #[error("audio download is not supported")]
    DownloadUnsupported,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("controller is no longer running")]
    ControllerClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpeechError {
    /// Guidance shown to the user, as opposed to the terse `Display` form.
    pub fn user_message(&self) -> String {
        match self {
            SpeechError::UnsupportedHost => {
                "Speech synthesis is not supported on this host. Please try a different browser or speech engine.".to_string()
            }
            SpeechError::DiscoveryExhausted { .. } => {
                "Unable to load voices after multiple attempts. Please refresh or try a different browser or speech engine.".to_string()
            }
            SpeechError::NoVoicesFound => "No voices found yet. Still trying...".to_string(),
            SpeechError::EmptyInput => "Please enter some text to generate speech.".to_string(),
            SpeechError::VoicesNotReady => {
                "Voices are still loading. Please wait a moment and try again.".to_string()
            }
            SpeechError::NoVoiceAvailable => {
                "No suitable voice found. Please try reloading the voices.".to_string()
            }
            SpeechError::Synthesis(kind) => {
                format!("Speech synthesis failed. {}", kind.guidance())
            }
            SpeechError::SynthesisTimeout => {
                "Speech synthesis timed out. Please try again with a different voice.".to_string()
            }
            SpeechError::DownloadUnsupported => {
                "Audio download requires server-side TTS processing. This tool uses the host speech engine for real-time playback. For downloadable audio files, consider a cloud TTS service such as Google Cloud TTS, Amazon Polly or Azure Speech.".to_string()
            }
            SpeechError::Config(msg) => format!("Configuration problem: {}", msg),
            SpeechError::ControllerClosed => {
                "The speech system has shut down. Please restart.".to_string()
            }
            SpeechError::Io(e) => format!("I/O failure: {}", e),
        }
    }

    /// Errors that leave the system unusable until the user changes something.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SpeechError::UnsupportedHost | SpeechError::DiscoveryExhausted { .. }
        )
    }
}

impl From<config::ConfigError> for SpeechError {
    fn from(err: config::ConfigError) -> Self {
        SpeechError::Config(err.to_string())
    }
}
