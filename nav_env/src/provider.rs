//! Routing provider port.

use async_trait::async_trait;
use crate::error::ProviderError;
use crate::types::{DirectionsRequest, DirectionsRoute};
use std::time::Duration;

/// Abstraction over the external routing service.
///
/// # Implementations
///
/// - **Production**: HTTP adapter for a directions API (see the agent binary)
/// - **Simulation**: corridor-based scripted router with failure injection
///
/// # Request Flow
///
/// ```text
/// Navigator                  Provider
///   |                           |
///   |-- directions(req) ------->|
///   |                           |-- [network / geocoding / routing]
///   |<-- Ok(route) | Err(e) ----|
/// ```
///
/// The engine only relies on this contract: origin and destination in, the
/// first route or a failure out. The caller enforces `request.timeout`.
#[async_trait]
pub trait RoutingProvider: Send + Sync + 'static {
    /// Requests a driving route.
    ///
    /// # Returns
    /// * `Ok(route)` - The first route of a successful response
    /// * `Err(ProviderError::ZeroResults)` - No route exists
    /// * `Err(_)` - Transport or provider failure
    async fn directions(&self, request: DirectionsRequest) -> Result<DirectionsRoute, ProviderError>;

    /// Short provider name for logs.
    fn name(&self) -> &str;
}

/// Fault injection for providers used in simulation.
pub trait ProviderController: Send + Sync {
    /// Makes the next `count` requests fail with `error`.
    fn fail_next(&self, count: usize, error: ProviderError);

    /// Adds artificial latency to every request.
    fn set_latency(&self, latency: Duration);

    /// Clears all injected faults.
    fn heal(&self);
}
