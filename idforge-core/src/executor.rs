//! Request execution: token attachment, caching, retry and validation.
//!
//! GET requests go through the [`ResponseCache`], which wraps a
//! retry-wrapped network call. Mutating requests skip the cache, are retried
//! directly, and on success invalidate cached entries for the affected path.
//! Responses outside 2xx always leave this layer as [`ApiError`].

use reqwest::{Method, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::cache::{CacheRequest, ResponseCache};
use crate::error::{ApiError, RequestError};
use crate::retry::{RetryPolicy, retry_after_from_headers};
use crate::store::Secret;
use crate::token::TokenSource;
use crate::validate::{ValidationError, Validator};

/// An outgoing API request, relative to the executor's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PATCH, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn is_mutating(&self) -> bool {
        matches!(
            self.method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }

    /// Path plus encoded query string, as used for cache keys.
    pub fn path_with_query(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }

        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&self.query)
            .finish();
        format!("{}?{}", self.path, query)
    }
}

/// Error body of the resource API.
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    code: Option<String>,
    message: Option<String>,
    #[serde(default)]
    details: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
    target: Option<String>,
}

/// Translate a non-2xx response into an [`ApiError`].
async fn api_error_from_response(response: Response) -> ApiError {
    let status = response.status();
    let retry_after = retry_after_from_headers(response.headers());
    let body = response.text().await.unwrap_or_default();
    let parsed: ApiErrorBody = serde_json::from_str(&body).unwrap_or_default();

    let mut message = parsed
        .message
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| "request failed".to_string());

    let details: Vec<String> = parsed
        .details
        .into_iter()
        .filter_map(|d| match (d.target, d.message) {
            (Some(target), Some(msg)) => Some(format!("{}: {}", target, msg)),
            (None, Some(msg)) => Some(msg),
            _ => None,
        })
        .collect();
    if !details.is_empty() {
        message = format!("{} ({})", message, details.join("; "));
    }

    ApiError {
        status: status.as_u16(),
        message,
        error_code: parsed.code,
        retry_after,
    }
}

/// Executes [`ApiRequest`]s with a bearer token, caching, retry and
/// validation.
pub struct RequestExecutor<P: TokenSource> {
    token_source: P,
    http_client: reqwest::Client,
    base_url: String,
    cache: ResponseCache,
    retry: RetryPolicy,
}

impl<P: TokenSource> RequestExecutor<P> {
    pub fn new(token_source: P, base_url: impl Into<String>) -> Self {
        Self {
            token_source,
            http_client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache: ResponseCache::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Share a cache with other executors, or choose its TTL.
    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = client;
        self
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn token_source(&self) -> &P {
        &self.token_source
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// Run `request` and validate its body with `validator`.
    pub async fn execute<T, V>(&self, request: &ApiRequest, validator: &V) -> Result<T, RequestError>
    where
        V: Validator<T> + ?Sized,
    {
        let token = self.token_source.access_token().await?;
        let operation = format!("{} {}", request.method, request.path);

        if request.is_mutating() {
            let body = self
                .retry
                .execute(&operation, || self.send(request, &token))
                .await?;

            // Any 2xx means the server state changed, whatever the body holds.
            self.cache.invalidate_related(&request.path);
            let value = decode_body(&body)?;
            return validator.validate(&value).map_err(RequestError::from);
        }

        let path = request.path_with_query();
        let cache_request = CacheRequest::new(&request.method, &path, &token);
        self.cache
            .get_cached(
                &cache_request,
                || self.fetch(&operation, request, &token),
                validator,
            )
            .await
    }

    async fn fetch(
        &self,
        operation: &str,
        request: &ApiRequest,
        token: &Secret,
    ) -> Result<Value, RequestError> {
        let body = self
            .retry
            .execute(operation, || self.send(request, token))
            .await?;
        decode_body(&body)
    }

    /// One network attempt. Non-2xx statuses become [`ApiError`]; a 2xx
    /// returns the raw body.
    async fn send(&self, request: &ApiRequest, token: &Secret) -> Result<Vec<u8>, RequestError> {
        let url = self.url_for(&request.path);
        debug!(method = %request.method, url = %url, "Sending request");

        let mut builder = self
            .http_client
            .request(request.method.clone(), &url)
            .bearer_auth(token.expose());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let err = api_error_from_response(response).await;
            debug!(status = err.status, message = %err.message, "Request failed");
            return Err(err.into());
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Decode a 2xx body. An empty body is JSON `null`.
fn decode_body(body: &[u8]) -> Result<Value, RequestError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }

    serde_json::from_slice(body).map_err(|e| {
        RequestError::Validation(ValidationError::new(format!(
            "response body is not JSON: {}",
            e
        )))
    })
}

impl<P: TokenSource> std::fmt::Debug for RequestExecutor<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("base_url", &self.base_url)
            .field("cache", &self.cache)
            .field("retry", &self.retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_path_with_query() {
        let request = ApiRequest::get("/environments/env-1/users")
            .with_query("filter", "email eq \"a@b.c\"")
            .with_query("limit", "10");
        assert_eq!(
            request.path_with_query(),
            "/environments/env-1/users?filter=email+eq+%22a%40b.c%22&limit=10"
        );
        assert_eq!(ApiRequest::get("/users").path_with_query(), "/users");
    }

    #[test]
    fn test_mutating_methods() {
        assert!(!ApiRequest::get("/users").is_mutating());
        assert!(ApiRequest::post("/users", json!({})).is_mutating());
        assert!(ApiRequest::put("/users/u1", json!({})).is_mutating());
        assert!(ApiRequest::patch("/users/u1", json!({})).is_mutating());
        assert!(ApiRequest::delete("/users/u1").is_mutating());
    }

    #[test]
    fn test_decode_body() {
        assert_eq!(decode_body(b"").unwrap(), Value::Null);
        assert_eq!(decode_body(b" \n").unwrap(), Value::Null);
        assert_eq!(decode_body(br#"{"id":"u1"}"#).unwrap(), json!({"id": "u1"}));
        assert!(matches!(
            decode_body(b"deleted"),
            Err(RequestError::Validation(_))
        ));
    }

    #[test]
    fn test_url_for() {
        let executor = RequestExecutor::new(
            crate::token::StaticToken(Secret::new("t")),
            "https://api.example.com/v1/",
        );
        assert_eq!(
            executor.url_for("/environments/env-1/users"),
            "https://api.example.com/v1/environments/env-1/users"
        );
        assert_eq!(
            executor.url_for("https://api.example.com/v1/next?cursor=abc"),
            "https://api.example.com/v1/next?cursor=abc"
        );
    }
}
