//! Classifies a field-access error message into one of the four reasons
//! named in spec §4.2, by pattern-matching the upstream's error text. The
//! upstream client never returns a structured reason — only a message — so
//! this is necessarily heuristic; `Unknown` is the safe default.

use cascade_core::RestrictionReason;

/// Classifies an upstream field-access error message.
#[must_use]
pub fn classify(message: &str) -> RestrictionReason {
    let lower = message.to_lowercase();
    if lower.contains("access") && (lower.contains("denied") || lower.contains("forbidden") || lower.contains("restrict")) {
        RestrictionReason::SecurityRestriction
    } else if lower.contains("permission") {
        RestrictionReason::SecurityRestriction
    } else if lower.contains("compute") || lower.contains("computation") {
        RestrictionReason::ComputeError
    } else if lower.contains("internal server error") || lower.contains("traceback") || lower.contains("odoo") {
        RestrictionReason::UpstreamError
    } else {
        RestrictionReason::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_restriction_patterns() {
        assert_eq!(classify("Access Denied to field amount"), RestrictionReason::SecurityRestriction);
        assert_eq!(classify("You do not have permission to read this field"), RestrictionReason::SecurityRestriction);
    }

    #[test]
    fn compute_error_pattern() {
        assert_eq!(classify("Error computing field expected_revenue"), RestrictionReason::ComputeError);
    }

    #[test]
    fn upstream_error_pattern() {
        assert_eq!(classify("Odoo Server Error: Traceback (most recent call last)"), RestrictionReason::UpstreamError);
    }

    #[test]
    fn unknown_fallback() {
        assert_eq!(classify("field not found"), RestrictionReason::Unknown);
    }
}
