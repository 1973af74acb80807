use crate::backends::HostVoice;
use serde::Serialize;
use std::fmt;

const PREMIUM_INDICATORS: [&str; 5] = ["premium", "neural", "wavenet", "enhanced", "natural"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceQuality {
    High,
    Medium,
    Low,
}

impl fmt::Display for VoiceQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceQuality::High => write!(f, "high"),
            VoiceQuality::Medium => write!(f, "medium"),
            VoiceQuality::Low => write!(f, "low"),
        }
    }
}

/// Rates a host voice from its metadata alone.
/// On-device voices win over premium-sounding names, which win over the host default.
pub fn assess(voice: &HostVoice) -> VoiceQuality {
    if voice.local_service {
        return VoiceQuality::High;
    }

    let name = voice.name.to_lowercase();
    if PREMIUM_INDICATORS.iter().any(|p| name.contains(p)) {
        return VoiceQuality::High;
    }

    if voice.default {
        VoiceQuality::Medium
    } else {
        VoiceQuality::Low
    }
}
