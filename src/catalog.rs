//! The curated preset voices offered for selection, independent of what the
//! host actually provides.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Male => write!(f, "male"),
            Gender::Female => write!(f, "female"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresetVoice {
    pub id: &'static str,
    pub name: &'static str,
    /// BCP-47 tag, e.g. `en-GB`
    pub lang: &'static str,
    pub gender: Gender,
    pub description: &'static str,
    pub accent: Option<&'static str>,
}

impl PresetVoice {
    /// Primary language subtag (`hi` for `hi-IN`).
    pub fn language_family(&self) -> &'static str {
        primary_subtag(self.lang)
    }

    pub fn is_hindi(&self) -> bool {
        self.lang.starts_with("hi")
    }

    /// Short phrase used when auditioning this voice.
    pub fn test_phrase(&self) -> &'static str {
        if self.is_hindi() {
            HINDI_TEST_PHRASE
        } else {
            ENGLISH_TEST_PHRASE
        }
    }
}

pub const ENGLISH_TEST_PHRASE: &str = "Hello, this is a voice test.";
pub const HINDI_TEST_PHRASE: &str = "नमस्ते, यह एक परीक्षण है।";

pub static PRESET_VOICES: [PresetVoice; 8] = [
    PresetVoice {
        id: "en-US-1",
        name: "Alex",
        lang: "en-US",
        gender: Gender::Male,
        description: "Professional American Male",
        accent: Some("American"),
    },
    PresetVoice {
        id: "en-US-2",
        name: "Emma",
        lang: "en-US",
        gender: Gender::Female,
        description: "Clear American Female",
        accent: Some("American"),
    },
    PresetVoice {
        id: "en-GB-1",
        name: "Oliver",
        lang: "en-GB",
        gender: Gender::Male,
        description: "British Male",
        accent: Some("British"),
    },
    PresetVoice {
        id: "en-GB-2",
        name: "Charlotte",
        lang: "en-GB",
        gender: Gender::Female,
        description: "British Female",
        accent: Some("British"),
    },
    PresetVoice {
        id: "en-AU-1",
        name: "William",
        lang: "en-AU",
        gender: Gender::Male,
        description: "Australian Male",
        accent: Some("Australian"),
    },
    PresetVoice {
        id: "en-AU-2",
        name: "Sophie",
        lang: "en-AU",
        gender: Gender::Female,
        description: "Australian Female",
        accent: Some("Australian"),
    },
    PresetVoice {
        id: "hi-IN-1",
        name: "Raj",
        lang: "hi-IN",
        gender: Gender::Male,
        description: "Hindi Male Voice",
        accent: Some("Indian"),
    },
    PresetVoice {
        id: "hi-IN-2",
        name: "Priya",
        lang: "hi-IN",
        gender: Gender::Female,
        description: "Hindi Female Voice",
        accent: Some("Indian"),
    },
];

pub fn find_preset(id: &str) -> Option<&'static PresetVoice> {
    PRESET_VOICES.iter().find(|v| v.id == id)
}

pub fn default_preset() -> &'static PresetVoice {
    &PRESET_VOICES[0]
}

/// Text before the first hyphen of a language tag.
pub fn primary_subtag(lang: &str) -> &str {
    lang.split('-').next().unwrap_or(lang)
}
