//! Client for the external identity / chart-info / record-result service.
//!
//! The service itself is an external collaborator; this module only owns
//! the adapter (bearer-token HTTP calls, tolerant JSON deserialization, and
//! a TTL cache in front of the token-keyed profile lookup).

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ServerError;

fn default_language() -> String {
    "zh-CN".to_string()
}

/// A user profile as returned by `/me`. Fields beyond what the server
/// consumes are accepted and ignored, so the adapter does not become
/// brittle to additive changes on the identity service's side.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct UserInfo {
    pub id: i32,
    pub name: String,
    #[serde(default = "default_language")]
    pub language: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ChartInfo {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RecordResult {
    pub score: i32,
    pub accuracy: f32,
    pub full_combo: bool,
}

/// The interface the rest of the server depends on; mirrors the transport
/// seam pattern used elsewhere in this codebase so a test double can stand
/// in for the real HTTP adapter.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    async fn get_user_info(&self, token: &str) -> Result<UserInfo, ServerError>;
    async fn get_chart_info(&self, id: i32) -> Result<ChartInfo, ServerError>;
    async fn get_record_result(&self, id: i32) -> Result<RecordResult, ServerError>;
}

/// `reqwest`-based implementation of [`IdentityClient`], fronted by a TTL
/// cache on the token-keyed profile lookup only (chart/record lookups are
/// not cached: they are one-shot reads tied to a single request).
pub struct HttpIdentityClient {
    http: reqwest::Client,
    base_url: String,
    cache: StdMutex<TtlCache<String, UserInfo>>,
}

impl HttpIdentityClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            cache: StdMutex::new(TtlCache::new(1_000, Duration::from_secs(300))),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl IdentityClient for HttpIdentityClient {
    async fn get_user_info(&self, token: &str) -> Result<UserInfo, ServerError> {
        if let Some(cached) = self.cache.lock().unwrap_or_else(|e| e.into_inner()).get(token) {
            return Ok(cached);
        }
        let response = self
            .http
            .get(self.url("/me"))
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?;
        let info: UserInfo = response.json().await?;
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(token.to_string(), info.clone());
        Ok(info)
    }

    async fn get_chart_info(&self, id: i32) -> Result<ChartInfo, ServerError> {
        let response = self
            .http
            .get(self.url(&format!("/chart/{id}")))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn get_record_result(&self, id: i32) -> Result<RecordResult, ServerError> {
        let response = self
            .http
            .get(self.url(&format!("/record/{id}")))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// A bounded, TTL-expiring cache. Eviction on overflow is oldest-insert-order
/// (the identity cache never holds more than 1,000 live tokens in practice,
/// so eviction policy beyond "make room" is not performance-critical).
struct TtlCache<K, V> {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<K, Entry<V>>,
    insertion_order: Vec<K>,
}

impl<K: std::hash::Hash + Eq + Clone, V: Clone> TtlCache<K, V> {
    fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            entries: HashMap::new(),
            insertion_order: Vec::new(),
        }
    }

    fn get(&mut self, key: &K) -> Option<V> {
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn insert(&mut self, key: K, value: V) {
        if !self.entries.contains_key(&key) {
            if self.entries.len() >= self.capacity {
                if let Some(oldest) = (!self.insertion_order.is_empty()).then(|| self.insertion_order.remove(0)) {
                    self.entries.remove(&oldest);
                }
            }
            self.insertion_order.push(key.clone());
        }
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn cache_returns_value_before_expiry() {
        let mut cache = TtlCache::new(10, Duration::from_secs(300));
        cache.insert("tok".to_string(), 42);
        assert_eq!(cache.get(&"tok".to_string()), Some(42));
    }

    #[test]
    fn cache_evicts_oldest_past_capacity() {
        let mut cache = TtlCache::new(2, Duration::from_secs(300));
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        cache.insert("c".to_string(), 3);
        assert_eq!(cache.get(&"a".to_string()), None);
        assert_eq!(cache.get(&"b".to_string()), Some(2));
        assert_eq!(cache.get(&"c".to_string()), Some(3));
    }

    #[test]
    fn cache_expires_entries() {
        let mut cache = TtlCache::new(10, Duration::from_millis(0));
        cache.insert("tok".to_string(), 1);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(&"tok".to_string()), None);
    }

    #[test]
    fn user_info_defaults_missing_language() {
        let json = r#"{"id": 1, "name": "Alice", "extra_field": 123}"#;
        let info: UserInfo = serde_json::from_str(json).expect("deserialize");
        assert_eq!(info.language, "zh-CN");
    }
}
