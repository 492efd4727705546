// src/core/cache.rs

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

type Slot = Arc<tokio::sync::Mutex<Option<(Instant, Arc<str>)>>>;

/// Time-bounded cache of fetched resources shared by all modules.
///
/// Each key has its own async lock, so concurrent callers asking for the same
/// resource wait for the one fetch in flight instead of issuing their own.
/// Failed fetches are never cached and a zero TTL disables caching.
#[derive(Default)]
pub struct ResourceCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_fetch<F, Fut, E>(&self, key: &str, ttl: Duration, fetch: F) -> Result<Arc<str>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(key.to_string()).or_default().clone()
        };

        let mut entry = slot.lock().await;
        if !ttl.is_zero() {
            if let Some((fetched_at, content)) = entry.as_ref() {
                if fetched_at.elapsed() < ttl {
                    debug!(key, "Serving resource from cache.");
                    return Ok(Arc::clone(content));
                }
            }
        }

        let content: Arc<str> = Arc::from(fetch().await?);
        if !ttl.is_zero() {
            *entry = Some((Instant::now(), Arc::clone(&content)));
        }
        Ok(content)
    }
}
