use thiserror::Error;

use crate::services::order_details::OrderAction;

/// Failures talking to the merchant or VASP backend.
///
/// A 404 on an id-targeted read is not an error; those calls return
/// `Option` (or the `Unknown` status sentinel) instead.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {endpoint}")]
    Status { status: u16, endpoint: String },

    #[error("Invalid response from backend: {0}")]
    InvalidResponse(String),

    #[error("Circuit breaker open: {0}")]
    CircuitBreakerOpen(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl GatewayError {
    /// HTTP status carried by the error, if the backend answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            GatewayError::Status { status, .. } => Some(*status),
            GatewayError::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ResolveError {
    #[error("Payment has no settlement options")]
    NoOptions,

    #[error("Option index {index} out of range ({len} options)")]
    OptionOutOfRange { index: usize, len: usize },

    #[error("Invalid VASP address: {0:?}")]
    InvalidAddress(String),

    #[error("Invalid wallet URL: {0}")]
    InvalidWalletUrl(#[from] url::ParseError),
}

#[derive(Error, Debug, PartialEq)]
pub enum ActionError {
    #[error("Order is not loaded")]
    NotLoaded,

    #[error("{0} is not permitted for this order")]
    NotPermitted(OrderAction),
}
