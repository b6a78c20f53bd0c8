//! # Connector Layer
//!
//! External integrations implementing application interfaces:
//! - Relational stores (DuckDB by default, PostgreSQL via `DATABASE_URL`)
//! - Source API and embedding API over HTTP
//! - Vector index (Qdrant REST, in-memory for tests)
//! - Settings and adapter wiring

pub mod adapter;
pub mod config;
pub mod container;

pub use adapter::*;
pub use config::*;
pub use container::*;
