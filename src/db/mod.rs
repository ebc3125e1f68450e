//! Database layer - connection pooling, schema and patient documents

pub mod documents;
pub mod pool;
pub mod schema;

pub use documents::{DocumentStore, PatientDocument};
pub use pool::Pool;
