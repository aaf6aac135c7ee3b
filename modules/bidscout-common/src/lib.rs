pub mod config;
pub mod error;
pub mod identity;
pub mod types;

pub use config::{ExecutionMode, RunConfig};
pub use error::BidscoutError;
pub use identity::SearchIdentity;
pub use types::*;
