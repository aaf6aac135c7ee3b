pub mod claude;
pub mod error;
pub mod schema;
pub mod usage;

pub use error::AiError;
pub use schema::StructuredOutput;
pub use usage::CallUsage;
