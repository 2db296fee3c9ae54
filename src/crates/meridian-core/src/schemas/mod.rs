//! Shared schemas for the meridian runtime
//!
//! Strongly-typed records that cross component boundaries. Untyped
//! string-keyed payloads are rejected at the bus boundary, so everything a
//! bus, sink, or service exchanges is defined here.

pub mod audit;
pub mod context;
pub mod correlation;
pub mod graph;
pub mod identity;
pub mod messages;
pub mod resource;
pub mod state;
pub mod task;
pub mod tools;

pub use audit::{AuditEntry, AuditQuery, VerificationReport};
pub use context::{AuditActionContext, AuditEventData, DeferralContext, GuidanceContext};
pub use correlation::{Correlation, CorrelationStatus};
pub use graph::{
    GraphNode, GraphScope, MemoryOpResult, MemoryOpStatus, MemoryQuery, NodeType, SearchFilter,
    TimeSeriesPoint,
};
pub use identity::{ActionKind, AgentIdentityRoot, CoreProfile, IdentityMetadata};
pub use messages::{FilterPriority, FilterVerdict, IncomingMessage};
pub use resource::{
    ResourceAction, ResourceBudget, ResourceLimit, ResourceSnapshot,
};
pub use state::AgentState;
pub use task::{TaskStatus, ThoughtStatus, ThoughtType};
pub use tools::ToolResult;
