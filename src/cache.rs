use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::client::Client;
use crate::error::DatasourceError;

const CLIENT_CACHE_SIZE: usize = 500;

/// Builds credential-scoped clients from a set of passthrough headers.
pub trait ClientProvider: Send + Sync {
    /// Client for the query API surface.
    fn query_client(&self, headers: &HashMap<String, String>)
        -> Result<Arc<Client>, DatasourceError>;

    /// Raw HTTP client for the resource passthrough surface.
    fn http_client(&self, headers: &HashMap<String, String>)
        -> Result<reqwest::Client, DatasourceError>;
}

/// Bounded cache of clients keyed by credential fingerprint. One cache per
/// API surface, both with the same keying and LRU eviction discipline.
///
/// Construction failures are returned without being inserted, so the next
/// call with the same headers retries. Concurrent misses on the same key may
/// each invoke the provider once before the first insert wins; the cache
/// converges but does not single-flight.
pub struct ProviderCache<P> {
    provider: P,
    query_clients: Mutex<LruCache<String, Arc<Client>>>,
    http_clients: Mutex<LruCache<String, reqwest::Client>>,
}

impl<P: ClientProvider> ProviderCache<P> {
    pub fn new(provider: P) -> Self {
        let cap = NonZeroUsize::new(CLIENT_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        ProviderCache {
            provider,
            query_clients: Mutex::new(LruCache::new(cap)),
            http_clients: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn query_client(
        &self,
        headers: &HashMap<String, String>,
    ) -> Result<Arc<Client>, DatasourceError> {
        let key = cache_key(headers);

        if let Ok(mut cache) = self.query_clients.lock() {
            if let Some(client) = cache.get(&key) {
                return Ok(client.clone());
            }
        }

        let client = self.provider.query_client(headers)?;

        if let Ok(mut cache) = self.query_clients.lock() {
            cache.put(key, client.clone());
        }
        Ok(client)
    }

    pub fn http_client(
        &self,
        headers: &HashMap<String, String>,
    ) -> Result<reqwest::Client, DatasourceError> {
        let key = cache_key(headers);

        if let Ok(mut cache) = self.http_clients.lock() {
            if let Some(client) = cache.get(&key) {
                return Ok(client.clone());
            }
        }

        let client = self.provider.http_client(headers)?;

        if let Ok(mut cache) = self.http_clients.lock() {
            cache.put(key, client.clone());
        }
        Ok(client)
    }
}

/// Credential fingerprint: header values only, sorted and concatenated.
/// Header names are intentionally ignored, so two header sets with the same
/// values under different names share one entry. This mirrors the reference
/// system's behavior; see DESIGN.md before changing the keying.
fn cache_key(headers: &HashMap<String, String>) -> String {
    let mut vals: Vec<&str> = headers.values().map(String::as_str).collect();
    vals.sort_unstable();
    vals.concat()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Doer, HttpResponse, RequestSpec};
    use crate::config::HttpMethod;
    use async_trait::async_trait;
    use reqwest::Url;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoopDoer;

    #[async_trait]
    impl Doer for NoopDoer {
        async fn send(&self, _spec: RequestSpec) -> Result<HttpResponse, DatasourceError> {
            Ok(HttpResponse {
                status: 200,
                body: String::new(),
            })
        }
    }

    struct FakeProvider {
        calls: AtomicUsize,
        errors: Mutex<Vec<DatasourceError>>,
    }

    impl FakeProvider {
        fn new() -> Self {
            FakeProvider {
                calls: AtomicUsize::new(0),
                errors: Mutex::new(Vec::new()),
            }
        }

        fn push_error(&self, err: DatasourceError) {
            self.errors.lock().unwrap().push(err);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ClientProvider for FakeProvider {
        fn query_client(
            &self,
            _headers: &HashMap<String, String>,
        ) -> Result<Arc<Client>, DatasourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.errors.lock().unwrap().pop() {
                return Err(err);
            }
            Ok(Arc::new(Client::new(
                Arc::new(NoopDoer),
                HttpMethod::Get,
                Url::parse("http://localhost:9090").unwrap(),
            )))
        }

        fn http_client(
            &self,
            _headers: &HashMap<String, String>,
        ) -> Result<reqwest::Client, DatasourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.errors.lock().unwrap().pop() {
                return Err(err);
            }
            Ok(reqwest::Client::new())
        }
    }

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn caches_client_for_a_set_of_auth_headers() {
        let cache = ProviderCache::new(FakeProvider::new());
        let h = headers(&[("Authorization", "token"), ("X-ID-Token", "id-token")]);

        let c1 = cache.query_client(&h).unwrap();
        let c2 = cache.query_client(&h).unwrap();

        assert!(Arc::ptr_eq(&c1, &c2));
        assert_eq!(cache.provider.calls(), 1);
    }

    #[test]
    fn different_header_values_get_distinct_clients() {
        let cache = ProviderCache::new(FakeProvider::new());
        let h1 = headers(&[("Authorization", "token"), ("X-ID-Token", "id-token")]);
        let h2 = headers(&[("Authorization", "token2"), ("X-ID-Token", "id-token")]);

        let c1 = cache.query_client(&h1).unwrap();
        let c2 = cache.query_client(&h2).unwrap();

        assert!(!Arc::ptr_eq(&c1, &c2));
        assert_eq!(cache.provider.calls(), 2);
    }

    #[test]
    fn keying_ignores_header_names_and_order() {
        let cache = ProviderCache::new(FakeProvider::new());
        let h1 = headers(&[("Authorization", "token"), ("X-ID-Token", "id-token")]);
        let h2 = headers(&[("X-Other", "id-token"), ("X-Auth", "token")]);

        let c1 = cache.query_client(&h1).unwrap();
        let c2 = cache.query_client(&h2).unwrap();

        assert!(Arc::ptr_eq(&c1, &c2));
        assert_eq!(cache.provider.calls(), 1);
    }

    #[test]
    fn construction_failures_are_never_cached() {
        let cache = ProviderCache::new(FakeProvider::new());
        cache
            .provider
            .push_error(DatasourceError::ClientConstruction("something bad".into()));
        let h = headers(&[("Authorization", "token")]);

        let err = cache.query_client(&h).unwrap_err();
        assert!(matches!(err, DatasourceError::ClientConstruction(_)));

        let c = cache.query_client(&h).unwrap();
        let c2 = cache.query_client(&h).unwrap();
        assert!(Arc::ptr_eq(&c, &c2));
        assert_eq!(cache.provider.calls(), 2);
    }

    #[test]
    fn http_client_cache_is_independent() {
        let cache = ProviderCache::new(FakeProvider::new());
        let h = headers(&[("Authorization", "token")]);

        cache.query_client(&h).unwrap();
        cache.http_client(&h).unwrap();
        cache.http_client(&h).unwrap();

        assert_eq!(cache.provider.calls(), 2);
    }

    #[test]
    fn concurrent_misses_converge_on_one_entry() {
        let cache = Arc::new(ProviderCache::new(FakeProvider::new()));
        let h = headers(&[("Authorization", "token")]);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let h = h.clone();
                std::thread::spawn(move || cache.query_client(&h).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Racing misses may each construct once, but never more than the
        // number of callers, and afterwards everyone hits the same entry.
        let races = cache.provider.calls();
        assert!((1..=8).contains(&races));
        let c1 = cache.query_client(&h).unwrap();
        let c2 = cache.query_client(&h).unwrap();
        assert!(Arc::ptr_eq(&c1, &c2));
        assert_eq!(cache.provider.calls(), races);
    }
}
