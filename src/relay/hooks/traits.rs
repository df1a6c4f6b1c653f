use async_trait::async_trait;

use super::context::ExchangeRecord;

/// Observer of finished chat exchanges (read-only)
#[async_trait]
pub trait ExchangeHook: Send + Sync {
    /// Called after a reply was produced (model, fact lookup or paywall)
    async fn on_exchange(&self, record: &ExchangeRecord);

    /// Called when the request failed after validation
    async fn on_failure(&self, record: &ExchangeRecord);

    /// Return the hook name for logging purposes
    fn name(&self) -> &'static str;
}
