//! PostgreSQL connection pool for the persistence collaborators.

pub mod pool;

pub use pool::{mask_database_url, PostgresPool, PostgresPoolError};
