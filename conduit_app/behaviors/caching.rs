use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::{any::type_name, marker::PhantomData, sync::Arc, time::Duration};
use tracing::{debug, warn};

use conduit_types::{MessageKind, errors::Result};

use crate::{
    cache::CacheStore,
    config::Config,
    cqrs::{Request, RequestContext},
    pipeline::{Next, PipelineBehavior, Priority},
};

/// Serves queries from a `CacheStore`. Commands always go through.
///
/// Only successful results are stored. An entry that no longer deserializes
/// into the response type is dropped and recomputed.
pub struct CachingBehavior<R> {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    _request: PhantomData<fn() -> R>,
}

impl<R> CachingBehavior<R>
where
    R: Request + Serialize,
    R::Response: Serialize + DeserializeOwned,
{
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            _request: PhantomData,
        }
    }

    pub fn from_config(store: Arc<dyn CacheStore>, config: &Config) -> Self {
        Self::new(store, config.cache_ttl)
    }

    /// Deterministic key: request type plus its serialized value. Going
    /// through `Value` sorts object keys, so map fields hash the same way
    /// whatever their iteration order.
    pub fn cache_key(request: &R) -> Result<String> {
        let value = serde_json::to_value(request)?;
        Ok(format!("{}:{}", type_name::<R>(), value))
    }
}

#[async_trait]
impl<R> PipelineBehavior<R> for CachingBehavior<R>
where
    R: Request + Serialize,
    R::Response: Serialize + DeserializeOwned,
{
    async fn handle(
        &self,
        request: &R,
        ctx: &RequestContext,
        next: Next<'_, R>,
    ) -> Result<R::Response> {
        if R::KIND != MessageKind::Query {
            return next.run().await;
        }

        let key = match Self::cache_key(request) {
            Ok(key) => key,
            Err(err) => {
                warn!(
                    correlation_id = %ctx.correlation_id(),
                    request = ctx.short_name(),
                    error = %err,
                    "Request has no cache key, skipping cache"
                );
                return next.run().await;
            }
        };

        if let Some(cached) = self.store.get(&key).await {
            match serde_json::from_value::<R::Response>(cached) {
                Ok(response) => {
                    debug!(correlation_id = %ctx.correlation_id(), %key, "Cache hit");
                    return Ok(response);
                }
                Err(err) => {
                    warn!(%key, error = %err, "Dropping unreadable cache entry");
                    self.store.remove(&key).await;
                }
            }
        }

        debug!(correlation_id = %ctx.correlation_id(), %key, "Cache miss");
        let response = next.run().await?;

        match serde_json::to_value(&response) {
            Ok(value) => self.store.set(key, value, self.ttl).await,
            Err(err) => warn!(%key, error = %err, "Response not cacheable"),
        }

        Ok(response)
    }

    fn priority(&self) -> Priority {
        Priority::CACHING
    }

    fn name(&self) -> &'static str {
        "CachingBehavior"
    }
}
