pub mod connection;
#[cfg(test)]
pub mod memory;
pub mod operations;
pub mod store;

pub use operations::PostgresStore;
pub use store::{RangeQuery, TelemetryStore};
