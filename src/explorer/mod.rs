pub mod client;
pub mod error;

pub use client::{EtherscanClient, ExplorerRequest, ExplorerTransport, interpret_response};
pub use error::ExplorerError;
