//! Proxywall Common Library
//!
//! Shared configuration, error handling, telemetry and collaborator clients
//! used by the proxywall services.

pub mod config;
pub mod error;
pub mod geoip;
pub mod metrics;
pub mod redis;
pub mod telemetry;

pub use config::Config;
pub use error::{Error, Result};
