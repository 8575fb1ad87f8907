//! Logging helpers with automatic redaction of sensitive values.
//!
//! Key material, onion addresses and payload bytes never reach log output
//! verbatim; wrap them in these types when passing to `tracing` macros.

use std::fmt;

/// A wrapper that redacts its contents entirely when displayed.
pub struct Redacted<T>(pub T);

impl<T> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

/// Redact an onion address, showing only the leading 4 characters and the
/// `.onion` suffix.
pub struct RedactedOnion<'a>(pub &'a str);

impl fmt::Display for RedactedOnion<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0;
        if s.len() > 12 {
            write!(f, "{}...{}", &s[..4], &s[s.len() - 6..])
        } else {
            write!(f, "[REDACTED ONION]")
        }
    }
}

impl fmt::Debug for RedactedOnion<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Redact a byte slice, showing only its length.
pub struct RedactedBytes<'a>(pub &'a [u8]);

impl fmt::Display for RedactedBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} bytes]", self.0.len())
    }
}

impl fmt::Debug for RedactedBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Render a control payload for debug logs: the JSON itself if it parses,
/// a placeholder otherwise. Binary channels are never logged.
pub fn safe_payload(data: &[u8]) -> String {
    match serde_json::from_slice::<serde_json::Value>(data) {
        Ok(_) => String::from_utf8_lossy(data).into_owned(),
        Err(_) => "*** NOT JSON ***".into(),
    }
}
