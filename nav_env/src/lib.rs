//! Navigation Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seam that lets the navigation engine run
//! both on a live vehicle (tokio + a real directions API) and inside the
//! deterministic simulator.
//!
//! # Core Concept
//!
//! Everything the engine cannot compute by itself is intercepted here:
//! - Time (`now()`, `system_time()`, `sleep()`)
//! - Background work (`spawn()`)
//! - Routing (`RoutingProvider::directions()`)
//!
//! # Example
//!
//! ```ignore
//! use nav_env::{NavContext, RoutingProvider};
//!
//! async fn tick_loop<Ctx: NavContext>(ctx: &Ctx, period: Duration) {
//!     loop {
//!         engine.step();
//!         ctx.sleep(period).await;
//!     }
//! }
//! ```

mod context;
mod provider;
mod types;
mod error;
mod tokio_impl;

pub use context::NavContext;
pub use provider::{RoutingProvider, ProviderController};
pub use types::{
    Destination, DirectionsRequest, DirectionsRoute, EncodedPolyline, LatLng, RawBounds, RawLeg,
    RawStep, TextValue, TrafficModel, TravelMode, DEFAULT_REQUEST_TIMEOUT,
};
pub use error::ProviderError;
pub use tokio_impl::TokioContext;
