//! Character and word heuristics for guessing the language of a transcript.

use std::collections::HashSet;

/// Latin-script languages told apart by their most frequent words
const COMMON_WORDS: &[(&str, &[&str])] = &[
    ("en", &["the", "and", "is", "in", "to", "of", "that", "it", "for", "with", "as", "on", "was", "at"]),
    ("es", &["el", "la", "de", "que", "y", "en", "un", "ser", "se", "no", "por", "con", "su", "los"]),
    ("fr", &["le", "de", "un", "être", "et", "à", "il", "ne", "je", "son", "que", "qui", "ce", "les"]),
    ("de", &["der", "die", "und", "in", "das", "von", "zu", "mit", "sich", "auf", "für", "ist", "nicht", "ein"]),
    ("pt", &["o", "de", "e", "que", "do", "da", "em", "um", "para", "com", "não", "uma", "os", "no"]),
];

#[derive(Debug, Default)]
struct ScriptCounts {
    latin: usize,
    hangul: usize,
    kana: usize,
    han: usize,
    arabic: usize,
    hebrew: usize,
    cyrillic: usize,
    thai: usize,
    devanagari: usize,
}

impl ScriptCounts {
    fn of(text: &str) -> Self {
        let mut counts = Self::default();
        for c in text.chars() {
            match c as u32 {
                0x41..=0x5A | 0x61..=0x7A | 0xC0..=0x24F => counts.latin += 1,
                0xAC00..=0xD7AF | 0x1100..=0x11FF | 0x3130..=0x318F | 0xA960..=0xA97F | 0xD7B0..=0xD7FF => {
                    counts.hangul += 1
                }
                0x3040..=0x30FF => counts.kana += 1,
                0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0x20000..=0x2A6DF => counts.han += 1,
                0x0600..=0x06FF | 0x0750..=0x077F | 0x08A0..=0x08FF | 0xFB50..=0xFDFF | 0xFE70..=0xFEFF => {
                    counts.arabic += 1
                }
                0x0590..=0x05FF => counts.hebrew += 1,
                0x0400..=0x052F | 0x2DE0..=0x2DFF | 0xA640..=0xA69F => counts.cyrillic += 1,
                0x0E00..=0x0E7F => counts.thai += 1,
                0x0900..=0x097F | 0xA8E0..=0xA8FF => counts.devanagari += 1,
                _ => {}
            }
        }
        counts
    }

    fn non_latin(&self) -> usize {
        self.hangul + self.kana + self.han + self.arabic + self.hebrew + self.cyrillic + self.thai + self.devanagari
    }
}

fn latin_language(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    let words: HashSet<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    COMMON_WORDS
        .iter()
        .map(|(code, common)| (*code, common.iter().filter(|w| words.contains(*w)).count()))
        .filter(|(_, score)| *score > 0)
        .fold(None, |best: Option<(&'static str, usize)>, (code, score)| match best {
            Some((_, top)) if top >= score => best,
            _ => Some((code, score)),
        })
        .map(|(code, _)| code)
        .unwrap_or("en")
}

/// ISO 639-1 code of the dominant language, `None` for text without letters
pub fn detect_language(text: &str) -> Option<&'static str> {
    let counts = ScriptCounts::of(text);
    let non_latin = counts.non_latin();
    if counts.latin == 0 && non_latin == 0 {
        return None;
    }

    if counts.latin * 2 > non_latin {
        return Some(latin_language(text));
    }

    let scripts = [
        ("ko", counts.hangul),
        ("ja", counts.kana),
        ("zh", counts.han),
        ("ar", counts.arabic),
        ("he", counts.hebrew),
        ("ru", counts.cyrillic),
        ("th", counts.thai),
        ("hi", counts.devanagari),
    ];
    let (code, _) = scripts
        .iter()
        .copied()
        .fold(("en", 0), |best, candidate| if candidate.1 > best.1 { candidate } else { best });

    // Japanese mixes kanji with kana
    if code == "zh" && counts.kana > 10 {
        return Some("ja");
    }
    Some(code)
}

/// Normalize a language name or tag (`Korean`, `ko-KR`, `ko`) to its ISO 639-1 code
pub fn language_code(language: &str) -> String {
    let lower = language.trim().to_lowercase();
    let primary = lower.split(['-', '_']).next().unwrap_or_default();
    let code = match primary {
        "english" => "en",
        "korean" => "ko",
        "japanese" => "ja",
        "chinese" => "zh",
        "spanish" => "es",
        "french" => "fr",
        "german" => "de",
        "portuguese" => "pt",
        "russian" => "ru",
        "arabic" => "ar",
        "hebrew" => "he",
        "thai" => "th",
        "hindi" => "hi",
        other => other,
    };
    code.to_string()
}

/// Whether two language names or tags refer to the same language
pub fn same_language(a: &str, b: &str) -> bool {
    language_code(a) == language_code(b)
}

/// English display name for a language code, used in generation instructions
pub fn display_name(language: &str) -> String {
    let name = match language_code(language).as_str() {
        "en" => "English",
        "ko" => "Korean",
        "ja" => "Japanese",
        "zh" => "Chinese",
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "pt" => "Portuguese",
        "ru" => "Russian",
        "ar" => "Arabic",
        "he" => "Hebrew",
        "th" => "Thai",
        "hi" => "Hindi",
        _ => return language.trim().to_string(),
    };
    name.to_string()
}
