//! Error reported when a request runs out of time.

use std::fmt;

/// Error produced by the default error factory when a request times out.
///
/// The same error is reported whether the request stalled for a whole cycle or
/// hit the cumulative ceiling while still writing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTimeoutError {
    message: String,
}

impl RequestTimeoutError {
    /// Create a new `RequestTimeoutError` with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The message, of the form `Timeout <METHOD> <URL>`.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for RequestTimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RequestTimeoutError {}

pub(crate) fn timeout_message(method: &str, url: &str) -> String {
    format!("Timeout {} {}", method, url)
}
