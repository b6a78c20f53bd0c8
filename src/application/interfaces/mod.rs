mod cursor_repository;
mod embedding_service;
mod record_repository;
mod record_source;
mod vector_repository;

pub use cursor_repository::*;
pub use embedding_service::*;
pub use record_repository::*;
pub use record_source::*;
pub use vector_repository::*;
