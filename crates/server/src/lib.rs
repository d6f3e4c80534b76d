//! SEPEX Server
//!
//! HTTP surface and bootstrap for the job engine: configuration loading,
//! component wiring, the axum router and graceful shutdown.

pub mod admin_api;
pub mod api_router;
pub mod bootstrap;
pub mod config;
pub mod dtos;
pub mod error;
pub mod job_api;
pub mod process_api;

pub use crate::api_router::create_api_router;
pub use crate::bootstrap::{AppState, BootstrapError, initialize_server};
pub use crate::config::{AppConfig, Cli, ConfigError};
