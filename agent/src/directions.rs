//! Google Directions adapter for the routing provider port.

use async_trait::async_trait;
use nav_env::{DirectionsRequest, DirectionsRoute, ProviderError, RoutingProvider};
use reqwest::Client;
use serde::Deserialize;
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

const DIRECTIONS_URL: &str = "https://maps.googleapis.com/maps/api/directions/json";

/// Directions API response envelope.
#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    status: String,
    #[serde(default)]
    routes: Vec<DirectionsRoute>,
    #[serde(default)]
    error_message: Option<String>,
}

/// HTTP client for the Google Directions API.
#[derive(Debug, Clone)]
pub struct GoogleDirections {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GoogleDirections {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .build()
            .map_err(|e| ProviderError::network(e.to_string()))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: DIRECTIONS_URL.to_string(),
        })
    }

    /// Points the client at another endpoint (proxies, test servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn query(&self, request: &DirectionsRequest) -> Vec<(&'static str, String)> {
        let departure = request
            .departure_time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        vec![
            ("origin", request.origin.to_string()),
            ("destination", request.destination.to_string()),
            ("mode", "driving".to_string()),
            ("departure_time", departure.to_string()),
            ("traffic_model", "best_guess".to_string()),
            ("key", self.api_key.clone()),
        ]
    }
}

/// Maps a response body onto the first route or a provider error.
fn parse_response(body: &str) -> Result<DirectionsRoute, ProviderError> {
    let response: DirectionsResponse = serde_json::from_str(body).map_err(ProviderError::invalid)?;

    match response.status.as_str() {
        "OK" => response
            .routes
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::invalid("status OK without routes")),
        "ZERO_RESULTS" | "NOT_FOUND" => Err(ProviderError::ZeroResults),
        status => {
            if let Some(message) = &response.error_message {
                warn!("Directions API {}: {}", status, message);
            }
            Err(ProviderError::Status(status.to_string()))
        }
    }
}

#[async_trait]
impl RoutingProvider for GoogleDirections {
    async fn directions(&self, request: DirectionsRequest) -> Result<DirectionsRoute, ProviderError> {
        debug!("Directions {} -> {}", request.origin, request.destination);

        let response = self
            .client
            .get(&self.base_url)
            .query(&self.query(&request))
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(request.timeout.as_millis() as u64)
                } else {
                    ProviderError::network(e.to_string())
                }
            })?;

        let body = response.text().await.map_err(|e| ProviderError::network(e.to_string()))?;
        parse_response(&body)
    }

    fn name(&self) -> &str {
        "google"
    }
}
