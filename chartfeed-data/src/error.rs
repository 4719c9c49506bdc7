use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors generated in `chartfeed-data`.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Error)]
pub enum FeedError {
    #[error("invalid feed url: {0}")]
    Url(String),

    #[error("websocket transport error: {0}")]
    Transport(String),

    #[error("api request failed: {0}")]
    Api(String),

    #[error("api returned error payload: {0}")]
    ApiPayload(String),

    #[error("api response malformed: {0}")]
    ApiDecode(String),
}

impl FeedError {
    /// Determine if an error means the transport is dead and the feed loop
    /// must re-establish the connection.
    pub fn is_terminal(&self) -> bool {
        match self {
            FeedError::Transport(error_msg) => {
                let error_lower = error_msg.to_lowercase();
                error_lower.contains("connectionclosed")
                    || error_lower.contains("alreadyclosed")
                    || error_lower.contains("io(")
                    || error_lower.contains("timeout")
                    || error_lower.contains("protocol")
            }
            _ => false,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(value: reqwest::Error) -> Self {
        Self::Api(value.to_string())
    }
}

impl From<url::ParseError> for FeedError {
    fn from(value: url::ParseError) -> Self {
        Self::Url(value.to_string())
    }
}
