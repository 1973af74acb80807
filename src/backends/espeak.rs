use super::{
    EventSink, HostVoice, SpeechBackend, SynthesisErrorKind, SynthesisEvent, SynthesisEventKind,
    Utterance,
};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::process::Stdio;
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

// espeak-ng's own fallback voice
const DEFAULT_VOICE_FILE: &str = "gmw/en";

lazy_static! {
    // Pty Language Age/Gender VoiceName File Other Languages
    static ref VOICE_LINE: Regex =
        Regex::new(r"^\s*(\d+)\s+(\S+)\s+(\S+)\s+(\S+)\s+(\S+)").unwrap();
}

pub struct EspeakBackend {
    binary: String,
    inventory: Mutex<Option<Vec<HostVoice>>>,
    current: Mutex<Option<oneshot::Sender<()>>>,
    changes: broadcast::Sender<()>,
}

impl EspeakBackend {
    pub fn new(binary: String) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            binary,
            inventory: Mutex::new(None),
            current: Mutex::new(None),
            changes,
        }
    }
}

/// Parses the table printed by `espeak-ng --voices`.
pub fn parse_voice_table(output: &str) -> Vec<HostVoice> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let caps = VOICE_LINE.captures(line)?;
            let lang = normalize_lang_tag(&caps[2]);
            let name = caps[4].replace('_', " ");
            let file = caps[5].to_string();
            Some(HostVoice {
                default: file == DEFAULT_VOICE_FILE,
                id: file,
                name,
                lang,
                local_service: true,
            })
        })
        .collect()
}

/// `en-gb` -> `en-GB`, `zh-hant-tw` -> `zh-Hant-TW`
pub fn normalize_lang_tag(tag: &str) -> String {
    tag.split(['-', '_'])
        .enumerate()
        .map(|(i, part)| {
            if i == 0 {
                part.to_lowercase()
            } else if part.len() == 2 {
                part.to_uppercase()
            } else if part.len() == 4 {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => {
                        first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                    }
                    None => String::new(),
                }
            } else {
                part.to_lowercase()
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Maps rate/pitch/volume multipliers onto espeak's units.
/// The text itself goes over stdin so a leading `-` is never read as an option.
fn espeak_args(utterance: &Utterance) -> Vec<String> {
    let wpm = (175.0 * utterance.rate).round().clamp(80.0, 450.0) as u32;
    let pitch = (50.0 * utterance.pitch).round().clamp(0.0, 99.0) as u32;
    let amplitude = (100.0 * utterance.volume).round().clamp(0.0, 200.0) as u32;
    vec![
        "-v".to_string(),
        utterance.voice.id.clone(),
        "-s".to_string(),
        wpm.to_string(),
        "-p".to_string(),
        pitch.to_string(),
        "-a".to_string(),
        amplitude.to_string(),
        "--stdin".to_string(),
    ]
}

#[async_trait]
impl SpeechBackend for EspeakBackend {
    fn id(&self) -> &'static str {
        "espeak-ng"
    }

    async fn is_supported(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn list_voices(&self) -> Vec<HostVoice> {
        if let Ok(cache) = self.inventory.lock() {
            if let Some(voices) = cache.as_ref() {
                return voices.clone();
            }
        }

        let output = match Command::new(&self.binary).arg("--voices").output().await {
            Ok(out) if out.status.success() => out,
            Ok(out) => {
                warn!(
                    stderr = %String::from_utf8_lossy(&out.stderr),
                    "espeak-ng --voices failed"
                );
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, "Failed to run {}", self.binary);
                return Vec::new();
            }
        };

        let voices = parse_voice_table(&String::from_utf8_lossy(&output.stdout));
        debug!(count = voices.len(), "espeak-ng voices listed");
        if !voices.is_empty() {
            if let Ok(mut cache) = self.inventory.lock() {
                *cache = Some(voices.clone());
            }
        }
        voices
    }

    fn subscribe_inventory(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }

    fn request_inventory_refresh(&self) {
        if let Ok(mut cache) = self.inventory.lock() {
            *cache = None;
        }
        // Nobody listening is fine
        let _ = self.changes.send(());
    }

    async fn speak(&self, utterance: Utterance, events: EventSink) -> std::io::Result<()> {
        self.cancel_current();

        let mut child = Command::new(&self.binary)
            .args(espeak_args(&utterance))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        if let Ok(mut current) = self.current.lock() {
            *current = Some(cancel_tx);
        }

        let id = utterance.id;
        let stdin = child.stdin.take();
        let _ = events.send(SynthesisEvent {
            utterance: id,
            kind: SynthesisEventKind::Start,
        });

        tokio::spawn(async move {
            let run = async {
                if let Some(mut stdin) = stdin {
                    if let Err(e) = stdin.write_all(utterance.text.as_bytes()).await {
                        // Exit status still decides the outcome
                        debug!(utterance = id, error = %e, "espeak-ng closed stdin early");
                    }
                    // Dropping closes the pipe; espeak-ng speaks once it sees EOF
                }
                child.wait().await
            };
            let exited = tokio::select! {
                status = run => Some(status),
                _ = cancel_rx => None,
            };
            let kind = match exited {
                Some(Ok(s)) if s.success() => SynthesisEventKind::End,
                Some(Ok(s)) => {
                    warn!(utterance = id, status = %s, "espeak-ng exited with failure");
                    SynthesisEventKind::Error(SynthesisErrorKind::SynthesisFailed)
                }
                Some(Err(e)) => {
                    warn!(utterance = id, error = %e, "Lost espeak-ng child");
                    SynthesisEventKind::Error(SynthesisErrorKind::SynthesisUnavailable)
                }
                None => {
                    let _ = child.kill().await;
                    debug!(utterance = id, "espeak-ng utterance cancelled");
                    return;
                }
            };
            let _ = events.send(SynthesisEvent { utterance: id, kind });
        });

        Ok(())
    }

    fn cancel_current(&self) {
        if let Ok(mut current) = self.current.lock() {
            if let Some(cancel) = current.take() {
                let _ = cancel.send(());
            }
        }
    }
}
