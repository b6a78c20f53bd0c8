mod embedding_deriver;
mod extractor;
mod retry;
mod sync_deletions;
mod sync_pipeline;
mod sync_status;

pub use embedding_deriver::*;
pub use extractor::*;
pub use retry::*;
pub use sync_deletions::*;
pub use sync_pipeline::*;
pub use sync_status::*;
