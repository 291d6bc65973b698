//! Filename synthesis
//!
//! Maps a captured URL and a user template onto a filesystem-safe filename.
//! Recognized placeholders are `{hostname}`, `{pathname}` and `{timestamp}`;
//! anything else in the template is copied through untouched.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use url::Url;

/// Extension appended to every synthesized filename
pub const SNAPSHOT_EXTENSION: &str = "html";

const HOSTNAME: &str = "{hostname}";
const PATHNAME: &str = "{pathname}";
const TIMESTAMP: &str = "{timestamp}";

/// Synthesize a filename using the current time for `{timestamp}`
pub fn synthesize(url: &str, pattern: &str) -> Result<String> {
    synthesize_at(url, pattern, Utc::now())
}

/// Synthesize a filename with an explicit capture time
///
/// The template is scanned once, left to right. Only the first occurrence of
/// each placeholder is substituted; later repeats are copied verbatim.
/// Substituted values are never rescanned.
pub fn synthesize_at(url: &str, pattern: &str, at: DateTime<Utc>) -> Result<String> {
    let parsed = Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{}: {}", url, e)))?;

    let hostname = sanitize(parsed.host_str().unwrap_or_default());
    let pathname = sanitize(parsed.path());
    let timestamp = format_timestamp(at);

    let mut out = String::with_capacity(pattern.len() + hostname.len() + pathname.len());
    let mut slots = [
        (HOSTNAME, hostname.as_str(), false),
        (PATHNAME, pathname.as_str(), false),
        (TIMESTAMP, timestamp.as_str(), false),
    ];
    let mut rest = pattern;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let slot = slots
            .iter_mut()
            .find(|(token, _, used)| !*used && tail.starts_with(*token));
        let token_len = match slot {
            Some((token, value, used)) => {
                *used = true;
                out.push_str(value);
                token.len()
            }
            None => {
                out.push('{');
                1
            }
        };
        rest = &tail[token_len..];
    }
    out.push_str(rest);

    out.push('.');
    out.push_str(SNAPSHOT_EXTENSION);
    Ok(out)
}

/// Replace every character outside `[A-Za-z0-9]` with `_`
pub fn sanitize(input: &str) -> String {
    input
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// ISO-8601 UTC with `:` and `.` replaced by `-`, e.g. `2024-05-01T12-30-05-123Z`
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string()
}
