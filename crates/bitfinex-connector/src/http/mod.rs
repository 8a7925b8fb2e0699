/*
[INPUT]:  HTTP client configuration and API endpoints
[OUTPUT]: HTTP responses and typed API results
[POS]:    HTTP layer - REST API communication
[UPDATE]: When adding new endpoints or changing client behavior
*/

pub mod client;
pub mod error;
pub mod history;
pub mod public;

pub use error::{BitfinexError, Result};

pub use client::{BitfinexClient, ClientConfig, PUBLIC_BASE_URL};
pub use history::{HistoryQuery, HistorySource};
