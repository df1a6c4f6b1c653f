use std::sync::Arc;
use tokio::sync::RwLock;

use super::context::ExchangeRecord;
use super::traits::ExchangeHook;

/// Registry for managing exchange hooks
#[derive(Clone)]
pub struct HookRegistry {
    hooks: Arc<RwLock<Vec<Arc<dyn ExchangeHook>>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            hooks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn register(&self, hook: Arc<dyn ExchangeHook>) {
        let mut hooks = self.hooks.write().await;
        tracing::info!("Registering hook: {}", hook.name());
        hooks.push(hook);
    }

    pub async fn trigger_exchange(&self, record: &ExchangeRecord) {
        let hooks = self.hooks.read().await;
        for hook in hooks.iter() {
            hook.on_exchange(record).await;
        }
    }

    pub async fn trigger_failure(&self, record: &ExchangeRecord) {
        let hooks = self.hooks.read().await;
        for hook in hooks.iter() {
            hook.on_failure(record).await;
        }
    }

    pub async fn hook_count(&self) -> usize {
        self.hooks.read().await.len()
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}
