/*
[INPUT]:  Error sources (validation, HTTP, WebSocket, decoding, valuation)
[OUTPUT]: Structured error type shared by the REST and streaming layers
[POS]:    Error handling layer - unified error types for entire crate
[UPDATE]: When adding new error sources or improving error messages
*/

use reqwest::StatusCode;
use thiserror::Error;

/// Main error type for the Bitfinex connector
#[derive(Error, Debug)]
pub enum BitfinexError {
    /// Pair is missing the market-type prefix
    #[error("Invalid pair `{0}`: expected a `t`-prefixed trading pair")]
    InvalidPair(String),

    /// Candle period is not one of the exchange bucket widths
    #[error("Unsupported candle period `{0}`")]
    UnsupportedPeriod(String),

    /// HTTP request failed before a response was read
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned a non-success status
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// No live WebSocket connection to send on
    #[error("WebSocket not connected")]
    NotConnected,

    /// Frame or response body did not match the expected shape
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Serialization of an outbound message failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Portfolio valuation is missing a rate
    #[error("No exchange rate available for {currency}")]
    MissingRate { currency: String },
}

impl BitfinexError {
    /// Check if the error came from the transport (connection or status)
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            BitfinexError::Http(_)
                | BitfinexError::Api { .. }
                | BitfinexError::WebSocket(_)
                | BitfinexError::NotConnected
        )
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            BitfinexError::Http(_) | BitfinexError::WebSocket(_) | BitfinexError::NotConnected => {
                true
            }
            BitfinexError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Check if the error was raised by client-side validation
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BitfinexError::InvalidPair(_) | BitfinexError::UnsupportedPeriod(_)
        )
    }

    /// Create an API error from status code and message
    pub fn api_error(status: StatusCode, message: impl Into<String>) -> Self {
        BitfinexError::Api {
            status: status.as_u16(),
            message: message.into(),
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        BitfinexError::MalformedPayload(message.into())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BitfinexError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        BitfinexError::WebSocket(err.to_string())
    }
}

/// Result type alias for connector operations
pub type Result<T> = std::result::Result<T, BitfinexError>;
