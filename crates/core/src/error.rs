use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("CDP error: {0}")]
    Cdp(String),

    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Resource failed to load: {0}")]
    ResourceLoad(String),

    #[error("{count} tests failed")]
    TestFailure { count: usize },

    /// The test framework never attached itself by the time the page loaded.
    #[error("Test framework missing: {0}")]
    FrameworkMissing(String),

    #[error("Protocol misuse: {0}")]
    ProtocolMisuse(String),

    #[error("Timed out after {0:?} waiting for tests to complete")]
    Timeout(Duration),

    #[error("Cannot embed dependency {0}: source contains a closing </script> tag")]
    EmbedGuard(String),

    #[error("Uncaught page error: {0}")]
    Page(String),

    #[error("Page disconnected: {0}")]
    Disconnected(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message_carries_count() {
        let err = Error::TestFailure { count: 3 };
        assert_eq!(err.to_string(), "3 tests failed");
    }

    #[test]
    fn test_timeout_message() {
        let err = Error::Timeout(Duration::from_millis(1500));
        assert!(err.to_string().contains("1.5s"));
    }
}
