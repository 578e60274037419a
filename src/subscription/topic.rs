use std::sync::LazyLock;

use regex::Regex;

/// `<domain>[/<scope>]/<target>` where scope and target are a Crowd Control
/// user id or `*`.
static TOPIC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?<domain>overlay|session|prv|pub|app|ext|whisper)(?:/(?<scope>\*|ccuid-[0-7][0-9a-hjkmnp-tv-z]{25}))?/(?<target>\*|ccuid-[0-7][0-9a-hjkmnp-tv-z]{25})$",
    )
    .unwrap()
});

/// Whether `topic` follows the broker's topic grammar.
pub fn is_valid(topic: &str) -> bool {
    TOPIC_PATTERN.is_match(topic)
}

