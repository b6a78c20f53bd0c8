mod embedding;
mod page;
mod persisted_record;
mod record;
mod record_schema;
mod run_mode;
mod sync_cursor;
mod sync_report;
mod sync_status;

pub use embedding::*;
pub use page::*;
pub use persisted_record::*;
pub use record::*;
pub use record_schema::*;
pub use run_mode::*;
pub use sync_cursor::*;
pub use sync_report::*;
pub use sync_status::*;
