//! Foundational services for the meridian agent runtime
//!
//! This crate holds everything the runtime composition layer builds on: the
//! time service abstraction, per-provider circuit breakers, the typed
//! multi-provider service registry, the bus facades that route calls through
//! it, the narrow service protocol traits, and the shared schemas that cross
//! component boundaries.
//!
//! Nothing in this crate touches a database or the filesystem; persistence
//! concerns live behind the [`buses::CorrelationStore`] and service protocol
//! ports and are implemented by the runtime crate.

pub mod buses;
pub mod circuit_breaker;
pub mod error;
pub mod protocols;
pub mod registry;
pub mod schemas;
pub mod time;

pub use buses::{BusManager, CommunicationBus, LlmBus, MemoryBus, ToolBus, WiseAuthorityBus};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::{CoreError, Result};
pub use registry::{
    ProviderRegistration, ProviderRegistry, SelectionStrategy, ServiceKind, ServicePriority,
    ServiceRegistry,
};
pub use time::{ManualTimeService, SystemTimeService, TimeService};

/// Get version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
