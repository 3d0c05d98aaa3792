//! Safety-refusal detection.

/// Lowercase phrases that mark a response as a safety refusal.
pub const REFUSAL_PHRASES: &[&str] = &[
    "cannot ignore my safety instructions",
    "must decline this request",
    "attempt to override",
    "cannot comply",
    "against my programming",
    "against my guidelines",
    "violates my guidelines",
];

/// Returns true if `text` contains any refusal phrase, ignoring case.
pub fn is_refusal(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    let lowered = text.to_lowercase();
    REFUSAL_PHRASES.iter().any(|phrase| lowered.contains(phrase))
}
