use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

static RATE_LIMIT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)rate[ -]?limit|max calls per sec|too many requests")
        .expect("rate limit pattern is valid")
});

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExplorerError {
    /// Request throttling. The only class worth retrying.
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("explorer API error: {0}")]
    Api(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("unexpected response shape: {0}")]
    Decode(String),
}

impl ExplorerError {
    /// Maps an error message returned by the API onto the taxonomy.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if RATE_LIMIT_PATTERN.is_match(&message) {
            ExplorerError::RateLimited(message)
        } else {
            ExplorerError::Api(message)
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ExplorerError::RateLimited(_))
    }
}
