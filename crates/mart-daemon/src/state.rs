//! Shared runtime state for mart-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. All mutable state
//! lives behind the engine's storage contracts; the daemon itself only
//! holds handles.

use mart_engine::OrderService;

/// Static build metadata included in the health response.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Cloneable handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Static build metadata.
    pub build: BuildInfo,
    /// The order lifecycle engine every handler delegates to.
    pub service: OrderService,
}

impl AppState {
    pub fn new(service: OrderService) -> Self {
        Self {
            build: BuildInfo {
                service: "mart-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            service,
        }
    }
}
