//! Campus community backend: posts, topics, sites and users over a typed data client,
//! with password and SMS-code authentication and object-storage uploads.

pub mod client;
pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod migration;
pub mod response;
pub mod routes;
pub mod service;
pub mod state;
pub mod storage;
pub mod store;

pub use client::{DataClient, MemoryClient, PgClient, Schema};
pub use config::{AppConfig, Environment, StorageBackend};
pub use error::{ApiCode, AppError, ConfigError};
pub use migration::apply_migrations;
pub use response::{ok, ok_empty, ok_with_message, ApiResponse, Envelope};
pub use routes::{api_routes, app, common_routes};
pub use state::AppState;
pub use store::ensure_database_exists;
