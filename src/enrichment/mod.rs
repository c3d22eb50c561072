pub mod cache;
pub mod engine;
pub mod source;
pub mod types;

pub use cache::BlockTimestampCache;
pub use engine::{Enricher, ExplorerEnricher};
pub use source::extract_source_text;
pub use types::{
    Confidence, ContractSource, CreationInfo, DeploymentTime, EnrichmentResult, iso_date,
};
