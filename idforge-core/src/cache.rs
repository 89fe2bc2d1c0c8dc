//! Response cache for GET requests.
//!
//! Entries are keyed by resource type, normalized path and a fingerprint of
//! the bearer token, so two identities never share an entry. Every read
//! re-validates the stored body against the caller's [`Validator`]; a body
//! that does not fit is recomputed and the entry overwritten.
//!
//! There is no single-flight de-duplication: concurrent misses for the same
//! key each run their computation and the last validated write wins.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::Method;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::store::Secret;
use crate::validate::{ValidationError, Validator};

/// Default time-to-live for cached responses.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Coarse resource category used to partition the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Users,
    Groups,
    Applications,
    Populations,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Groups => "groups",
            Self::Applications => "applications",
            Self::Populations => "populations",
        }
    }

    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "users" => Some(Self::Users),
            "groups" => Some(Self::Groups),
            "applications" => Some(Self::Applications),
            "populations" => Some(Self::Populations),
            _ => None,
        }
    }

    /// Resource type of the first recognized segment in `path`.
    pub fn from_path(path: &str) -> Option<Self> {
        let (path, _) = normalize_path(path);
        path.split('/').find_map(Self::from_segment)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split a path or URL into a normalized path and optional query string.
///
/// Scheme and host are dropped, repeated and trailing slashes removed.
pub fn normalize_path(input: &str) -> (String, Option<String>) {
    let without_origin = match url::Url::parse(input) {
        Ok(url) if url.has_host() => {
            let mut rest = url.path().to_string();
            if let Some(query) = url.query() {
                rest.push('?');
                rest.push_str(query);
            }
            rest
        }
        _ => input.to_string(),
    };

    let (path, query) = match without_origin.split_once('?') {
        Some((path, query)) if !query.is_empty() => (path, Some(query.to_string())),
        Some((path, _)) => (path, None),
        None => (without_origin.as_str(), None),
    };

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    (format!("/{}", segments.join("/")), query)
}

/// Stable, non-reversible identifier for a bearer token.
pub fn token_fingerprint(token: &Secret) -> String {
    let digest = Sha256::digest(token.expose().as_bytes());
    hex::encode(&digest[..8])
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub resource_type: ResourceType,
    /// Normalized path without the query string.
    pub path: String,
    pub query: Option<String>,
    pub fingerprint: String,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub resource_type: ResourceType,
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(value: Value, resource_type: ResourceType) -> Self {
        Self {
            value,
            resource_type,
            cached_at: Utc::now(),
        }
    }

    fn is_expired_at(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.cached_at);
        age.to_std().map(|age| age >= ttl).unwrap_or(false)
    }
}

/// What the cache needs to know about an outgoing request.
#[derive(Debug, Clone, Copy)]
pub struct CacheRequest<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub token: &'a Secret,
}

impl<'a> CacheRequest<'a> {
    pub fn new(method: &'a Method, path: &'a str, token: &'a Secret) -> Self {
        Self {
            method,
            path,
            token,
        }
    }
}

/// Shared cache of validated GET responses.
///
/// Clones share the same entries.
#[derive(Clone)]
pub struct ResponseCache {
    entries: Arc<RwLock<HashMap<CacheKey, CacheEntry>>>,
    ttl: Duration,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache")
            .field("entries", &self.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Cache key for a request, or `None` when the request is not cacheable
    /// (non-GET or unrecognized resource).
    pub fn key_for(&self, request: &CacheRequest<'_>) -> Option<CacheKey> {
        if *request.method != Method::GET {
            return None;
        }

        let (path, query) = normalize_path(request.path);
        let resource_type = path.split('/').find_map(ResourceType::from_segment)?;

        Some(CacheKey {
            resource_type,
            path,
            query,
            fingerprint: token_fingerprint(request.token),
        })
    }

    fn lookup(&self, key: &CacheKey) -> Option<Value> {
        let now = Utc::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired_at(self.ttl, now) => {
                    return Some(entry.value.clone());
                }
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write();
        if entries
            .get(key)
            .is_some_and(|entry| entry.is_expired_at(self.ttl, now))
        {
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|entry| entry.value.clone())
    }

    /// Return a validated value for `request`, computing it when needed.
    ///
    /// Non-GET requests and paths without a recognized resource bypass the
    /// cache and always invoke `compute`. A cached body that fails `validator`
    /// is treated as a miss and overwritten with the recomputed value.
    pub async fn get_cached<T, E, F, Fut, V>(
        &self,
        request: &CacheRequest<'_>,
        compute: F,
        validator: &V,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        V: Validator<T> + ?Sized,
        E: From<ValidationError>,
    {
        let Some(key) = self.key_for(request) else {
            let value = compute().await?;
            return validator.validate(&value).map_err(E::from);
        };

        if let Some(cached) = self.lookup(&key) {
            match validator.validate(&cached) {
                Ok(value) => {
                    debug!(resource = %key.resource_type, path = %key.path, "Cache hit");
                    return Ok(value);
                }
                Err(e) => {
                    debug!(
                        resource = %key.resource_type,
                        path = %key.path,
                        error = %e,
                        "Cached entry does not fit requested shape, recomputing"
                    );
                }
            }
        } else {
            debug!(resource = %key.resource_type, path = %key.path, "Cache miss");
        }

        let value = compute().await?;
        let validated = validator.validate(&value).map_err(E::from)?;

        let resource_type = key.resource_type;
        let now = Utc::now();
        let mut entries = self.entries.write();
        entries.retain(|_, entry| !entry.is_expired_at(self.ttl, now));
        entries.insert(key, CacheEntry::new(value, resource_type));

        Ok(validated)
    }

    /// Drop every entry for `resource_type` at `url_path`, whatever its query
    /// string or token. Returns how many entries were removed.
    pub fn invalidate(&self, resource_type: ResourceType, url_path: &str) -> usize {
        let (path, _) = normalize_path(url_path);
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| !(key.resource_type == resource_type && key.path == path));
        let removed = before - entries.len();

        if removed > 0 {
            debug!(resource = %resource_type, path = %path, removed, "Invalidated cache entries");
        }
        removed
    }

    /// Invalidate after a mutation of `url_path`: the path itself and its
    /// parent collection, so `/users/u1` also stales the `/users` listing.
    pub fn invalidate_related(&self, url_path: &str) -> usize {
        let (path, _) = normalize_path(url_path);
        let Some(resource_type) = ResourceType::from_path(&path) else {
            return 0;
        };

        let mut removed = self.invalidate(resource_type, &path);
        if let Some((parent, _)) = path.rsplit_once('/') {
            if !parent.is_empty() && ResourceType::from_path(parent) == Some(resource_type) {
                removed += self.invalidate(resource_type, parent);
            }
        }
        removed
    }

    #[cfg(test)]
    fn backdate(&self, by: chrono::Duration) {
        for entry in self.entries.write().values_mut() {
            entry.cached_at = entry.cached_at - by;
        }
    }
}
