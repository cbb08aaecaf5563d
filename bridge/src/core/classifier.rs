//! Classification of remote failures into "context gone" vs everything else.

use std::sync::LazyLock;

use regex::Regex;

/// How the executor should react to a failed command submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The remote execution context no longer exists; reconnecting may help.
    ContextInvalid,
    /// Any other failure (network, timeout, user error). Never retried.
    Other,
}

static CONTEXT_ERROR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)context\s*(?:[\w-]+\s+)?(not\s*found|does\s*not\s*exist|is\s*invalid|expired)|invalid\s*context|\bcontext_id\b|execution\s*context",
    )
    .unwrap()
});

/// Return true if `message` reports an invalidated execution context.
///
/// Both conditions must hold: the message mentions "context" at all, and it
/// matches one of the known invalidation phrasings. Messages such as
/// "File not found" or "Session expired" are never context errors.
pub fn is_context_invalid_error(message: &str) -> bool {
    if !message.to_lowercase().contains("context") {
        return false;
    }
    CONTEXT_ERROR_RE.is_match(message)
}

/// Classify a failure message.
pub fn classify_failure(message: &str) -> FailureKind {
    if is_context_invalid_error(message) {
        FailureKind::ContextInvalid
    } else {
        FailureKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_known_invalidation_messages() {
        let messages = [
            "Context not found",
            "Execution context does not exist",
            "Invalid context ID provided",
            "Execution context expired",
            "Error: context_id is invalid",
            "CONTEXT IS INVALID",
            "ContextNotFound: context   not   found for id 1234",
            "Context ctx-1 does not exist",
            "Context 1234 not found",
            "Context ab12 not found",
            "Context 0a1b is invalid",
        ];
        for message in messages {
            assert!(is_context_invalid_error(message), "{message}");
            assert_eq!(classify_failure(message), FailureKind::ContextInvalid);
        }
    }

    #[test]
    fn ignores_messages_without_context() {
        let messages = [
            "Network timeout",
            "File not found: /path/to/file",
            "NameError: name 'x' is not defined",
            "Invalid argument: value must be positive",
            "Session expired",
            "",
        ];
        for message in messages {
            assert!(!is_context_invalid_error(message), "{message}");
            assert_eq!(classify_failure(message), FailureKind::Other);
        }
    }

    #[test]
    fn loose_context_mentions_are_not_invalidation() {
        assert!(!is_context_invalid_error("failed to load context manager"));
        assert!(!is_context_invalid_error("contextual help unavailable"));
        assert!(!is_context_invalid_error("context manager: file not readable"));
    }
}
