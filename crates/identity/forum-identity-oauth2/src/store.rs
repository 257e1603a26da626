//! Provider configuration storage.

use crate::config::ProviderConfig;
use crate::error::OAuth2Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[async_trait]
pub trait ProviderConfigStore: Send + Sync {
    async fn get_provider_config(&self, key: &str) -> OAuth2Result<Option<ProviderConfig>>;

    async fn save_provider_config(&self, config: ProviderConfig) -> OAuth2Result<()>;

    async fn list_provider_configs(&self) -> OAuth2Result<Vec<ProviderConfig>>;
}

/// In-memory implementation of ProviderConfigStore
#[derive(Clone, Default)]
pub struct InMemoryProviderStore {
    providers: Arc<RwLock<BTreeMap<String, ProviderConfig>>>,
}

impl InMemoryProviderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_providers(providers: impl IntoIterator<Item = ProviderConfig>) -> Self {
        let providers = providers
            .into_iter()
            .map(|config| (config.key.clone(), config))
            .collect();
        Self {
            providers: Arc::new(RwLock::new(providers)),
        }
    }
}

#[async_trait]
impl ProviderConfigStore for InMemoryProviderStore {
    async fn get_provider_config(&self, key: &str) -> OAuth2Result<Option<ProviderConfig>> {
        Ok(self.providers.read().await.get(key).cloned())
    }

    async fn save_provider_config(&self, config: ProviderConfig) -> OAuth2Result<()> {
        let mut providers = self.providers.write().await;
        providers.insert(config.key.clone(), config);
        Ok(())
    }

    async fn list_provider_configs(&self) -> OAuth2Result<Vec<ProviderConfig>> {
        Ok(self.providers.read().await.values().cloned().collect())
    }
}

/// Load a provider record, creating the default one when none exists
pub async fn ensure_provider(
    store: &dyn ProviderConfigStore,
    key: &str,
) -> OAuth2Result<ProviderConfig> {
    if let Some(config) = store.get_provider_config(key).await? {
        return Ok(config);
    }

    let config = ProviderConfig::new(key);
    store.save_provider_config(config.clone()).await?;
    info!("Created default provider record for {}", key);
    Ok(config)
}
