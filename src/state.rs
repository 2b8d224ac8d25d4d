//! Application state management

use std::sync::Arc;

use crate::anchoring::AnchorResolver;
use crate::config::Config;
use crate::db::RecordStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    store: RecordStore,
    resolver: AnchorResolver,
}

impl AppState {
    pub fn new(config: Config, store: RecordStore) -> Self {
        let resolver = AnchorResolver::new(&config.anchoring, &config.markers.id_attribute);
        Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                resolver,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the annotation store
    pub fn store(&self) -> &RecordStore {
        &self.inner.store
    }

    /// Resolver built from the anchoring config
    pub fn resolver(&self) -> &AnchorResolver {
        &self.inner.resolver
    }

    /// Close the store before exit
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down application state...");
        self.inner.store.close().await;
    }
}
