//! Error types for the routing provider port.

use thiserror::Error;

/// Failures a routing provider can report.
///
/// None of these are fatal to the engine: the Navigator converts them into
/// status strings at the call boundary via [`ProviderError::status_code`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The request did not complete within its deadline
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// The provider found no route between origin and destination
    #[error("No route found")]
    ZeroResults,

    /// Non-success status reported by the provider, passed through verbatim
    #[error("Provider returned status {0}")]
    Status(String),

    /// Transport failure (connection refused, TLS, DNS, ...)
    #[error("Network error: {0}")]
    Network(String),

    /// The provider answered but the payload could not be used
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Creates an invalid-response error.
    pub fn invalid(msg: impl std::fmt::Display) -> Self {
        Self::InvalidResponse(msg.to_string())
    }

    /// Status string surfaced to command callers.
    pub fn status_code(&self) -> String {
        match self {
            ProviderError::Timeout(_) => "TIMEOUT".to_string(),
            ProviderError::ZeroResults => "ZERO_RESULTS".to_string(),
            ProviderError::Status(code) => code.clone(),
            ProviderError::Network(_) => "NETWORK_ERROR".to_string(),
            ProviderError::InvalidResponse(_) => "INVALID_RESPONSE".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ProviderError::Timeout(10_000).status_code(), "TIMEOUT");
        assert_eq!(ProviderError::ZeroResults.status_code(), "ZERO_RESULTS");
        assert_eq!(
            ProviderError::Status("OVER_QUERY_LIMIT".into()).status_code(),
            "OVER_QUERY_LIMIT"
        );
        assert_eq!(ProviderError::network("refused").status_code(), "NETWORK_ERROR");
    }
}
