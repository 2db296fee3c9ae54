//! Hash-chained audit service
//!
//! Audit entries are stored twice: as immutable graph nodes (primary
//! storage, queried through the memory bus) and as rows in a parallel
//! SQLite chain where each entry is linked to its predecessor by a SHA-256
//! hash and signed with the service's Ed25519 key. The chain database is
//! append-only for its lifetime; retention pruning only ever touches graph
//! storage.

mod hash_chain;
mod service;
mod signature;
mod verifier;

pub use hash_chain::{compute_entry_hash, AuditHashChain, ChainRow, GENESIS_HASH};
pub use service::{AuditService, AuditServiceParams, ExportFormat};
pub use signature::SignatureManager;
pub use verifier::AuditVerifier;
