//! Maps an abstract preset voice onto the best concrete host voice.
//!
//! Scores are additive; see [`score`]. Selection is deterministic: highest
//! score wins and equal scores resolve to the earliest voice in the inventory.

use crate::backends::HostVoice;
use crate::catalog::{primary_subtag, Gender, PresetVoice};
use tracing::{debug, info};

const EXACT_LANG: i32 = 100;
const HINDI_HINT: i32 = 90;
const LANG_FAMILY: i32 = 80;
const GENDER_HINT: i32 = 50;
const NAME_HINT: i32 = 40;
const LOCAL_SERVICE: i32 = 30;
const ACCENT_HINT: i32 = 25;
const HOST_DEFAULT: i32 = 20;

const HINDI_KEYWORDS: [&str; 3] = ["hi", "hindi", "devanagari"];

const MALE_KEYWORDS: [&str; 11] = [
    "male", "man", "alex", "oliver", "william", "raj", "amit", "vikram", "david", "james",
    "michael",
];
const FEMALE_KEYWORDS: [&str; 11] = [
    "female", "woman", "emma", "charlotte", "sophie", "priya", "kavya", "shreya", "sarah",
    "anna", "maria",
];

fn gender_keywords(gender: Gender) -> &'static [&'static str] {
    match gender {
        Gender::Male => &MALE_KEYWORDS,
        Gender::Female => &FEMALE_KEYWORDS,
    }
}

fn accent_keywords(accent: &str) -> &'static [&'static str] {
    match accent {
        "American" => &["us", "united states", "america"],
        "British" => &["gb", "uk", "britain", "british"],
        "Australian" => &["au", "australia", "australian"],
        "Indian" => &["in", "india", "indian"],
        _ => &[],
    }
}

/// How well `voice` fits `target`. Anything at or below zero is not a candidate.
pub fn score(voice: &HostVoice, target: &PresetVoice) -> i32 {
    let name = voice.name.to_lowercase();
    let lang = voice.lang.to_lowercase();
    let mut score = 0;

    if voice.lang == target.lang {
        score += EXACT_LANG;
    } else if primary_subtag(&voice.lang) == target.language_family() {
        score += LANG_FAMILY;
    } else if target.is_hindi()
        && HINDI_KEYWORDS
            .iter()
            .any(|k| lang.contains(k) || name.contains(k))
    {
        score += HINDI_HINT;
    }

    if gender_keywords(target.gender).iter().any(|k| name.contains(k)) {
        score += GENDER_HINT;
    }

    if voice.local_service {
        score += LOCAL_SERVICE;
    }
    if voice.default {
        score += HOST_DEFAULT;
    }

    if name.contains(&target.name.to_lowercase()) {
        score += NAME_HINT;
    }

    if let Some(accent) = target.accent {
        if accent_keywords(accent)
            .iter()
            .any(|k| lang.contains(k) || name.contains(k))
        {
            score += ACCENT_HINT;
        }
    }

    score
}

/// Best host voice for `target`, or `None` when nothing in the inventory fits.
pub fn best_match<'a>(inventory: &'a [HostVoice], target: &PresetVoice) -> Option<&'a HostVoice> {
    if inventory.is_empty() {
        return None;
    }

    debug!(
        preset = target.name,
        lang = target.lang,
        gender = %target.gender,
        "Finding host voice"
    );

    let mut best: Option<(&HostVoice, i32)> = None;
    for voice in inventory {
        let s = score(voice, target);
        debug!(voice = %voice.name, lang = %voice.lang, score = s, "Scored");
        if s <= 0 {
            continue;
        }
        // Strictly greater keeps the earliest voice on ties
        if best.map_or(true, |(_, top)| s > top) {
            best = Some((voice, s));
        }
    }

    if let Some((voice, s)) = best {
        info!(preset = target.name, voice = %voice.name, score = s, "Best match");
        return Some(voice);
    }

    let fallback = family_fallback(inventory, target);
    match fallback {
        Some(voice) => info!(preset = target.name, voice = %voice.name, "Fallback match"),
        None => info!(preset = target.name, "No suitable voice"),
    }
    fallback
}

/// First voice sharing the preset's primary language subtag, whatever its score.
pub fn family_fallback<'a>(
    inventory: &'a [HostVoice],
    target: &PresetVoice,
) -> Option<&'a HostVoice> {
    let family = target.language_family();
    inventory.iter().find(|v| primary_subtag(&v.lang) == family)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::find_preset;

    fn voice(name: &str, lang: &str) -> HostVoice {
        HostVoice {
            id: name.to_string(),
            name: name.to_string(),
            lang: lang.to_string(),
            local_service: false,
            default: false,
        }
    }

    fn preset(id: &str) -> &'static PresetVoice {
        find_preset(id).unwrap()
    }

    #[test]
    fn test_hindi_voice_outscores_generic() {
        let inventory = vec![
            voice("Generic", "en-US"),
            HostVoice {
                local_service: true,
                ..voice("Hindi Male", "hi-IN")
            },
        ];
        let raj = preset("hi-IN-1");
        assert!(score(&inventory[1], raj) > score(&inventory[0], raj));
        assert_eq!(best_match(&inventory, raj).unwrap().name, "Hindi Male");
    }

    #[test]
    fn test_exact_language_beats_family() {
        let inventory = vec![voice("Voice A", "en-US"), voice("Voice B", "en-GB")];
        let oliver = preset("en-GB-1");
        assert_eq!(best_match(&inventory, oliver).unwrap().lang, "en-GB");
    }

    #[test]
    fn test_score_components() {
        let emma = preset("en-US-2");
        // 100 exact + 50 gender (emma) + 40 name + 25 accent (us) + 30 local + 20 default
        let v = HostVoice {
            local_service: true,
            default: true,
            ..voice("Emma", "en-US")
        };
        assert_eq!(score(&v, emma), 265);

        // Family only: "en-IE" has no accent keyword for American
        assert_eq!(score(&voice("Moira", "en-IE"), emma), 80);
    }

    #[test]
    fn test_hindi_hint_only_for_hindi_presets() {
        let v = voice("Lekha Devanagari", "xx");
        assert_eq!(score(&v, preset("hi-IN-2")), 90);
        assert_eq!(score(&v, preset("en-GB-2")), 0);
    }

    #[test]
    fn test_ties_keep_inventory_order() {
        let inventory = vec![voice("First", "en-AU"), voice("Second", "en-AU")];
        assert_eq!(
            best_match(&inventory, preset("en-AU-2")).unwrap().name,
            "First"
        );
    }

    #[test]
    fn test_fallback_to_language_family() {
        let odd = PresetVoice {
            id: "xx-1",
            name: "Nobody",
            lang: "zz-QQ",
            gender: crate::catalog::Gender::Female,
            description: "",
            accent: None,
        };
        let inventory = vec![voice("Plain", "fr-FR"), voice("Plain 2", "zz")];
        assert_eq!(score(&inventory[0], &odd), 0);
        assert_eq!(family_fallback(&inventory, &odd).unwrap().name, "Plain 2");
        assert_eq!(best_match(&inventory, &odd).unwrap().name, "Plain 2");

        let inventory = vec![voice("Plain", "fr-FR")];
        assert!(family_fallback(&inventory, &odd).is_none());
        assert!(best_match(&inventory, &odd).is_none());
    }

    #[test]
    fn test_empty_inventory() {
        assert!(best_match(&[], preset("en-US-1")).is_none());
    }
}
