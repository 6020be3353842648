pub mod app;

pub use app::{AppConfig, Environment, StorageBackend};
