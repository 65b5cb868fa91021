//! Per-namespace name normalization.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

static INVALID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid regex"));
static INVALID_LEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^A-Za-z0-9_]+").expect("valid regex"));
static INVALID_TRAILING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9]+$").expect("valid regex"));
static REPEATED_SPECIAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-_.]{2,}").expect("valid regex"));
static CONFUSING_EXTENSIONS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.(js|json|css|htm|html|xml|jpg|jpeg|png|gif|bmp|ico|tif|tiff|woff)$")
        .expect("valid regex")
});
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Reduce a candidate to the username alphabet (`[A-Za-z0-9._-]`).
///
/// Accents are folded to their base letter before anything else is replaced,
/// so `José` becomes `Jose` rather than `Jos_`.
pub fn sanitize_username(name: &str) -> String {
    let folded: String = name.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    let name = folded.trim();

    let name = INVALID_CHARS.replace_all(name, "_");
    let name = INVALID_LEADING.replace(&name, "");
    let name = CONFUSING_EXTENSIONS.replace(&name, "_");
    let name = INVALID_TRAILING.replace(&name, "");
    REPEATED_SPECIAL.replace_all(&name, "_").into_owned()
}

/// Clean the tail left behind by truncating a username.
pub fn clean_username_tail(name: &str) -> String {
    INVALID_TRAILING.replace(name, "").into_owned()
}

/// Normalize a display name (categories, badges): NFC, trimmed, with inner
/// whitespace runs collapsed to one space.
pub fn sanitize_display_name(name: &str) -> String {
    let normalized: String = name.nfc().collect();
    WHITESPACE
        .replace_all(normalized.trim(), " ")
        .into_owned()
}

pub fn clean_display_name_tail(name: &str) -> String {
    name.trim_end().to_string()
}

/// First `max` characters of `name`.
pub fn truncate_chars(name: &str, max: usize) -> String {
    name.chars().take(max).collect()
}
