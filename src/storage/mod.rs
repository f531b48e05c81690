// storage/mod.rs
// Database operations module

pub mod bounded_pool;
pub mod gateway;
pub mod models;
pub mod pool;
pub mod schema;

#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used items
pub use bounded_pool::{BoundedPool, ConnectionPool, PooledConnection};
pub use gateway::{MetricsPool, MetricsStore};
pub use models::{MetricRow, WebsiteRow};
pub use pool::SqliteConnectionPool;
pub use schema::{load_schema, BUNDLED_SCHEMA};
