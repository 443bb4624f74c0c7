use once_cell::sync::Lazy;
use regex::{Captures, Regex};

// A fence alternative comes first so that matches starting inside a fenced
// span are consumed by it and written back unchanged.
static REASONING_BLOCK_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)(```.*?```)|<(?:think|thinking|reasoning|internal)>.*?</(?:think|thinking|reasoning|internal)>|<think\s*/>",
    )
    .unwrap()
});

static MULTIPLE_NEWLINES_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)(```.*?```)|\n{3,}").unwrap());

/// Strip reasoning tags some models emit around their visible answer and
/// collapse runs of blank lines. Text inside closed ``` fences is kept
/// byte for byte.
pub fn clean_completion(response: &str) -> String {
    let cleaned = REASONING_BLOCK_PATTERN.replace_all(response, |caps: &Captures| {
        caps.get(1).map(|fence| fence.as_str().to_string()).unwrap_or_default()
    });
    MULTIPLE_NEWLINES_PATTERN
        .replace_all(cleaned.trim(), |caps: &Captures| {
            caps.get(1)
                .map(|fence| fence.as_str().to_string())
                .unwrap_or_else(|| "\n\n".to_string())
        })
        .into_owned()
}
