//! Shared application state for all routes.

use crate::client::{DataClient, MemoryClient, Schema};
use crate::config::AppConfig;
use crate::service::codes::{CodeStore, MemoryCodeStore};
use crate::service::sms::{LogSmsSender, SmsSender};
use crate::service::token::TokenIssuer;
use crate::storage::{MemoryStorage, ObjectStorage};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub client: Arc<dyn DataClient>,
    /// Verification codes; injected so deployments can swap the in-memory map for a shared store.
    pub codes: Arc<dyn CodeStore>,
    pub sms: Arc<dyn SmsSender>,
    pub storage: Arc<dyn ObjectStorage>,
    pub tokens: Arc<TokenIssuer>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        client: Arc<dyn DataClient>,
        codes: Arc<dyn CodeStore>,
        sms: Arc<dyn SmsSender>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        let tokens = Arc::new(TokenIssuer::new(config.jwt_secret.as_bytes(), config.jwt_ttl_secs));
        AppState {
            client,
            codes,
            sms,
            storage,
            tokens,
            config: Arc::new(config),
        }
    }

    /// Everything in process: memory data client, code store and storage; SMS goes to the log.
    pub fn in_memory(config: AppConfig) -> Self {
        Self::new(
            config,
            Arc::new(MemoryClient::new(Schema::campus())),
            Arc::new(MemoryCodeStore::new()),
            Arc::new(LogSmsSender),
            Arc::new(MemoryStorage::new()),
        )
    }
}
