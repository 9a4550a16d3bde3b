//! Request identity.

use serde::{Deserialize, Serialize};

/// A unit of work in a batch.
///
/// Requests are opaque to the dispatcher: a label plus the position the
/// producer assigned it. Fields are private so a request cannot change
/// after it is enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Request {
    /// 1-based position in the batch
    seq: usize,
    /// Human-readable label
    label: String,
}

impl Request {
    /// Create a new request.
    pub fn new(seq: usize, label: impl Into<String>) -> Self {
        Self {
            seq,
            label: label.into(),
        }
    }

    /// Position in the batch, starting at 1.
    pub fn seq(&self) -> usize {
        self.seq
    }

    /// The request label.
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_creation() {
        let request = Request::new(3, "Request 3");
        assert_eq!(request.seq(), 3);
        assert_eq!(request.label(), "Request 3");
        assert_eq!(request.to_string(), "Request 3");
    }

    #[test]
    fn test_request_equality() {
        assert_eq!(Request::new(1, "a"), Request::new(1, "a"));
        assert_ne!(Request::new(1, "a"), Request::new(2, "a"));
    }
}
