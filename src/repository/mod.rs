pub mod address_repository;
pub mod database;
pub mod merge;
pub mod models;
pub mod source_repository;

pub use address_repository::{AddressRepository, DEFAULT_ADDRESS_BATCH_SIZE};
pub use database::Database;
pub use merge::{ADDRESS_MERGE_POLICY, MergeStrategy, merge_records};
pub use models::{AddressRecord, NetworkStats, SourceRecord, Tag};
pub use source_repository::{DEFAULT_SOURCE_BATCH_SIZE, SourceRepository};
