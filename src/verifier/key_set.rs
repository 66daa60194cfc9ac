//! Remote signing-key set (JWKS) with refresh on unknown `kid`.
//!
//! Keys are refetched in two situations:
//!
//! - the cached set is older than the cache TTL, so keys the identity
//!   provider has since withdrawn stop being trusted;
//! - a token names a `kid` the cache does not know, which is the provider's
//!   signal that keys have rotated.
//!
//! Either way a refresh happens at most once per minimum refresh interval,
//! so a stream of tokens with made-up `kid`s cannot turn into a stream of
//! requests to the provider. Concurrent misses share one fetch: waiters queue
//! on `fetch_mutex` and re-check the generation counter before going to the
//! network themselves.
//!
//! A failed fetch leaves the previous keys in place. The request that
//! triggered it is rejected unless the old set already had its key.

use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{Jwk, JwkSet};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::verifier::VerifyError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a fetched set is used before it is refetched.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Minimum time between two fetches of the set.
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct Cached {
    keys: Option<Arc<JwkSet>>,
    fetched_at: Option<Instant>,
    last_attempt: Option<Instant>,
    /// Bumped on every successful fetch.
    generation: u64,
}

/// The trusted key set, fetched lazily from `jwks_url`.
#[derive(Debug)]
pub struct RemoteKeySet {
    jwks_url: String,
    client: reqwest::Client,
    ttl: Duration,
    min_refresh_interval: Duration,
    cache: RwLock<Cached>,
    fetch_mutex: Mutex<()>,
}

impl RemoteKeySet {
    /// Creates a key set backed by a client with a 5-second request timeout.
    ///
    /// Nothing is fetched until the first token needs a key.
    pub fn new(jwks_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(jwks_url, client))
    }

    pub fn with_client(jwks_url: impl Into<String>, client: reqwest::Client) -> Self {
        let jwks_url = jwks_url.into();
        if !jwks_url.starts_with("https://") {
            warn!(url = %jwks_url, "key set URL is not https");
        }
        Self {
            jwks_url,
            client,
            ttl: DEFAULT_CACHE_TTL,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            cache: RwLock::new(Cached::default()),
            fetch_mutex: Mutex::new(()),
        }
    }

    /// Sets how long a fetched set is trusted before it is refetched.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the minimum time between two fetches.
    ///
    /// A set with no keys yet is always fetched.
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    pub fn url(&self) -> &str {
        &self.jwks_url
    }

    /// Returns the keys a token with header `kid` may be signed with.
    ///
    /// With a `kid` that is the single matching key. Without one it is every
    /// key in the set. An expired set or a cache miss triggers a refresh,
    /// unless one ran less than the minimum refresh interval ago.
    pub async fn keys_for(&self, kid: Option<&str>) -> Result<Vec<Jwk>, VerifyError> {
        let (seen, previous) = {
            let cached = self.cache.read().await;
            let now = Instant::now();
            match &cached.keys {
                Some(set) => {
                    let fresh = cached.fetched_at.is_some_and(|at| now.duration_since(at) < self.ttl);
                    let found = match (fresh, select(set, kid)) {
                        (true, Some(keys)) => return Ok(keys),
                        (_, found) => found,
                    };
                    let throttled = cached
                        .last_attempt
                        .is_some_and(|at| now.duration_since(at) < self.min_refresh_interval);
                    if throttled {
                        debug!(kid = ?kid, "key set refresh throttled");
                        return found.ok_or_else(|| unknown(kid));
                    }
                    (cached.generation, found)
                }
                None => (cached.generation, None),
            }
        };

        match self.refresh(seen).await {
            Ok(set) => select(&set, kid).ok_or_else(|| unknown(kid)),
            Err(e) => match previous {
                Some(keys) => {
                    warn!(url = %self.jwks_url, "using expired key set after failed refresh");
                    Ok(keys)
                }
                None => Err(e),
            },
        }
    }

    /// Refetches the set unless someone else already did since `seen`.
    async fn refresh(&self, seen: u64) -> Result<Arc<JwkSet>, VerifyError> {
        let _fetch_guard = self.fetch_mutex.lock().await;

        {
            let cached = self.cache.read().await;
            if cached.generation != seen {
                if let Some(keys) = &cached.keys {
                    return Ok(Arc::clone(keys));
                }
            }
        }

        let result = self.fetch().await;
        let mut cached = self.cache.write().await;
        let now = Instant::now();
        cached.last_attempt = Some(now);

        let set = match result {
            Ok(set) => Arc::new(set),
            Err(e) => {
                warn!(url = %self.jwks_url, error = %e, "key set refresh failed");
                return Err(e);
            }
        };

        cached.keys = Some(Arc::clone(&set));
        cached.fetched_at = Some(now);
        cached.generation += 1;
        info!(url = %self.jwks_url, keys = set.keys.len(), generation = cached.generation, "key set refreshed");
        Ok(set)
    }

    async fn fetch(&self) -> Result<JwkSet, VerifyError> {
        let res = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| VerifyError::KeySet(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            return Err(VerifyError::KeySet(format!("{} returned {status}", self.jwks_url)));
        }

        let set: JwkSet = res
            .json()
            .await
            .map_err(|e| VerifyError::KeySet(format!("invalid key set: {e}")))?;

        if set.keys.is_empty() {
            return Err(VerifyError::KeySet("key set contains no keys".to_owned()));
        }
        Ok(set)
    }
}

fn unknown(kid: Option<&str>) -> VerifyError {
    VerifyError::UnknownKey(kid.map(str::to_owned))
}

fn select(set: &JwkSet, kid: Option<&str>) -> Option<Vec<Jwk>> {
    match kid {
        Some(kid) => set.find(kid).map(|jwk| vec![jwk.clone()]),
        None if set.keys.is_empty() => None,
        None => Some(set.keys.clone()),
    }
}
