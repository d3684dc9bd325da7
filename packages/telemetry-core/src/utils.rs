//! General utilities shared across the application.

use std::time::{SystemTime, UNIX_EPOCH};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Identifier sanitization
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum length a sanitized call id is truncated to.
pub const SANITIZED_CALL_ID_MAX_LEN: usize = 96;

/// Sanitizes a caller-supplied `call_id` for safe use as a filesystem path segment.
///
/// Allows `[A-Za-z0-9_.-]`, replaces anything else with `_`, trims leading/trailing
/// `.`/`_`, truncates to [`SANITIZED_CALL_ID_MAX_LEN`] characters, and defaults to
/// `"call"` if the result would be empty. This is what keeps a `call_id` of
/// `"../../etc/passwd"` from escaping the per-call directory.
#[must_use]
pub fn sanitize_call_id(raw: &str) -> String {
    let mut sanitized: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(SANITIZED_CALL_ID_MAX_LEN)
        .collect();

    let trimmed = sanitized.trim_matches(|c| c == '.' || c == '_');
    if trimmed.len() != sanitized.len() {
        sanitized = trimmed.to_string();
    }

    if sanitized.is_empty() {
        "call".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_millis_is_nonzero() {
        assert!(now_millis() > 0);
    }

    #[test]
    fn sanitize_call_id_replaces_path_traversal_characters() {
        let sanitized = sanitize_call_id("../../etc/passwd");
        assert!(!sanitized.contains('/'));
        assert!(!sanitized.starts_with('.'));
    }

    #[test]
    fn sanitize_call_id_keeps_allowed_characters() {
        assert_eq!(sanitize_call_id("call-123_abc.def"), "call-123_abc.def");
    }

    #[test]
    fn sanitize_call_id_truncates_long_values() {
        let long = "a".repeat(200);
        let sanitized = sanitize_call_id(&long);
        assert_eq!(sanitized.len(), SANITIZED_CALL_ID_MAX_LEN);
    }

    #[test]
    fn sanitize_call_id_defaults_when_empty() {
        assert_eq!(sanitize_call_id(""), "call");
        assert_eq!(sanitize_call_id("..."), "call");
    }
}
