pub mod content;
pub mod importer;
pub mod normalize;
pub mod parser;
pub mod scheduler;
pub mod storage;
pub mod types;
pub mod upsert;
pub mod utils;

pub use content::{ContentFilter, PassthroughFilter};
pub use importer::FeedImporter;
pub use parser::{HttpParser, Parser};
pub use scheduler::{LeaseStore, MemoryLeaseStore, RefreshScheduler};
pub use storage::{MemoryStorage, PgStorage, Storage};
pub use types::*;
pub use upsert::upsert_post;
