//! Language name lookups shared by the HTTP providers.
//!
//! Clients declare languages by English name ("Spanish"). Backends want ISO
//! 639-1 codes, and speech synthesis needs a voice per language.

/// (name, ISO 639-1 code, speech voice)
const LANGUAGES: &[(&str, &str, &str)] = &[
    ("English", "en", "alloy"),
    ("Spanish", "es", "nova"),
    ("French", "fr", "shimmer"),
    ("German", "de", "onyx"),
    ("Italian", "it", "fable"),
    ("Portuguese", "pt", "echo"),
    ("Russian", "ru", "alloy"),
    ("Japanese", "ja", "shimmer"),
    ("Korean", "ko", "nova"),
    ("Chinese", "zh", "alloy"),
    ("Arabic", "ar", "onyx"),
    ("Hindi", "hi", "fable"),
    ("Turkish", "tr", "echo"),
    ("Dutch", "nl", "alloy"),
    ("Polish", "pl", "nova"),
];

fn lookup(language: &str) -> Option<&'static (&'static str, &'static str, &'static str)> {
    let language = language.trim();
    LANGUAGES.iter().find(|(name, code, _)| {
        name.eq_ignore_ascii_case(language) || code.eq_ignore_ascii_case(language)
    })
}

/// ISO code for a language name (or code). Unknown languages map to "en".
pub fn language_code(language: &str) -> &'static str {
    lookup(language).map(|(_, code, _)| *code).unwrap_or("en")
}

/// Speech voice for a language. Unknown languages get "alloy".
pub fn voice_for(language: &str) -> &'static str {
    lookup(language).map(|(_, _, voice)| *voice).unwrap_or("alloy")
}
