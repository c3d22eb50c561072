pub mod classifier;
pub mod config;
pub mod enrichment;
pub mod explorer;
pub mod query;
pub mod repository;
pub mod retry;
pub mod revalidation;
pub mod rpc;
