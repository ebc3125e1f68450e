//! Load coordination: a shared work queue drained by a pool of workers

pub mod coordinator;
pub mod worker;

pub use coordinator::{LoadConfig, LoadCoordinator, LoadResult};
