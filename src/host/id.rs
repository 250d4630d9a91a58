//! Stable entity ID generation and validation.
//!
//! IDs follow `<kind>-<YYYYMMDD>-<HHmm>-<slug>` where the timestamp is in the
//! configured timezone and the slug is derived from the title: lowercase
//! ASCII, `[a-z0-9-]`, max 50 chars, collapsed hyphens, no leading/trailing
//! hyphens. Titles that slug to nothing fall back to a short hex token.
//! Collisions within the same minute get a numeric suffix.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use regex::Regex;

use crate::timeutil;

/// Maximum slug length in characters.
const MAX_SLUG_LEN: usize = 50;

/// Upper bound on collision suffixes before giving up.
const MAX_COLLISION_SUFFIX: u32 = 1000;

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z][a-z0-9_]*-\d{8}-\d{4}-[a-z0-9](?:[a-z0-9-]*[a-z0-9])?$")
            .expect("static ID pattern is valid")
    })
}

/// Whether a string is a well-formed entity ID.
pub fn valid_id(id: &str) -> bool {
    id_pattern().is_match(id) && !id.contains("--")
}

/// Extract the kind prefix of an ID (the text before the first hyphen).
pub fn kind_of(id: &str) -> Option<&str> {
    id.split_once('-').map(|(kind, _)| kind)
}

/// Slugify a title into `[a-z0-9-]`, collapsed and trimmed, max 50 chars.
///
/// Returns an empty string when nothing survives (e.g. all-emoji titles);
/// callers substitute a hex token.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len().min(MAX_SLUG_LEN));
    let mut last_hyphen = true; // suppress leading hyphen
    for ch in title.chars() {
        let mapped = match ch {
            'a'..='z' | '0'..='9' => Some(ch),
            'A'..='Z' => Some(ch.to_ascii_lowercase()),
            _ => None,
        };
        match mapped {
            Some(c) => {
                slug.push(c);
                last_hyphen = false;
            }
            None if !last_hyphen => {
                slug.push('-');
                last_hyphen = true;
            }
            None => {}
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Generate a fresh entity ID for `kind` at `now`.
///
/// `exists` is consulted to detect collisions (same kind, minute, and slug);
/// colliding IDs get `-2`, `-3`, … appended.
pub fn generate(
    kind: &str,
    title: &str,
    tz: Tz,
    now: DateTime<Utc>,
    exists: impl Fn(&str) -> bool,
) -> String {
    let stamp = timeutil::id_stamp(tz, now);
    let slug = {
        let s = slugify(title);
        if s.is_empty() {
            short_hex()
        } else {
            s
        }
    };

    let base = format!("{kind}-{stamp}-{slug}");
    if !exists(&base) {
        return base;
    }
    for n in 2..MAX_COLLISION_SUFFIX {
        let candidate = format!("{base}-{n}");
        if !exists(&candidate) {
            return candidate;
        }
    }
    // Pathological collision storm: fall back to a random token.
    format!("{kind}-{stamp}-{}", short_hex())
}

/// Short random hex token for slug-less titles.
fn short_hex() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id.chars().take(8).collect()
}
