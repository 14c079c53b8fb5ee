//! Driving the portal through a real browser over the DevTools
//! protocol.

pub mod dom;
mod session;

pub use session::Session;

use std::time::Duration;

use chromiumoxide::error::CdpError;

/// Failure taxonomy for live page interactions.
///
/// The split matters to callers: only `Stale` is a transient race worth
/// retrying, while `NotFound` and `Timeout` mean the page structurally
/// lacks what we expect and retrying would mask a real failure.
#[derive(Debug, thiserror::Error)]
pub enum UiError {
    #[error("element {selector:?} went stale after a re-render")]
    Stale { selector: String },

    #[error("element not found: {selector}")]
    NotFound { selector: String },

    #[error("timed out after {timeout:?} waiting for {what}")]
    Timeout { what: String, timeout: Duration },

    #[error("script against {selector:?} failed: {message}")]
    Script { selector: String, message: String },

    #[error(transparent)]
    Driver(#[from] CdpError),
}

impl UiError {
    /// The retry predicate for re-render races.
    pub fn is_stale(&self) -> bool {
        matches!(self, UiError::Stale { .. })
    }
}

/// Map a driver failure for an interaction with `selector` into the
/// taxonomy.
pub(crate) fn classify(selector: &str, err: CdpError) -> UiError {
    match err {
        CdpError::NotFound => UiError::NotFound {
            selector: selector.to_string(),
        },
        CdpError::Chrome(ref chrome) if is_stale_node_message(&chrome.message) => UiError::Stale {
            selector: selector.to_string(),
        },
        other => UiError::Driver(other),
    }
}

/// Messages the backend uses when a previously resolved node no longer
/// belongs to the live document.
fn is_stale_node_message(message: &str) -> bool {
    message.contains("Could not find node")
        || message.contains("No node with given id")
        || message.contains("not belong to the document")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_stale_is_retryable() {
        let stale = UiError::Stale {
            selector: "select".to_string(),
        };
        let missing = UiError::NotFound {
            selector: "select".to_string(),
        };
        let timeout = UiError::Timeout {
            what: "element select".to_string(),
            timeout: Duration::from_secs(5),
        };

        assert!(stale.is_stale());
        assert!(!missing.is_stale());
        assert!(!timeout.is_stale());
    }

    #[test]
    fn test_classify_not_found() {
        let err = classify("select[name='BAN']", CdpError::NotFound);
        assert!(matches!(err, UiError::NotFound { .. }));
    }

    #[test]
    fn test_stale_node_messages() {
        assert!(is_stale_node_message("Could not find node with given id"));
        assert!(is_stale_node_message(
            "Node with given id does not belong to the document"
        ));
        assert!(!is_stale_node_message("Session closed"));
    }
}
