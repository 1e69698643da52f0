//! Infrastructure layer modules
//!
//! Shared components used by the transport:
//! - `auth`: handshake authentication (JWT)
//! - `config`: application settings
//! - `error`: HTTP-facing error type
//! - `metrics`: Prometheus metrics helpers
//! - `postgres`: PostgreSQL connection pool

pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod postgres;
