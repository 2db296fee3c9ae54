//! Database layer
//!
//! Connection pooling, explicit schema creation, row models, and stateless
//! repositories over SQLite. Timestamps are ISO8601 strings throughout due
//! to SQLite type limitations.

pub mod connection;
pub mod models;
pub mod repositories;
pub mod schema;

pub use connection::{DatabaseConnection, DatabasePool};
