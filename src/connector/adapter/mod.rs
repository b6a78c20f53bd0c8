mod duckdb_cursor_repository;
mod duckdb_record_repository;
mod http_embedding;
mod http_record_source;
mod in_memory_vector_repository;
mod mock_embedding;
mod postgres_record_repository;
mod qdrant_vector_repository;
mod static_record_source;

pub use duckdb_cursor_repository::*;
pub use duckdb_record_repository::*;
pub use http_embedding::*;
pub use http_record_source::{extract_records, HttpRecordSource};
pub use in_memory_vector_repository::*;
pub use mock_embedding::*;
pub use postgres_record_repository::*;
pub use qdrant_vector_repository::*;
pub use static_record_source::*;
