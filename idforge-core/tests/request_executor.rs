//! Integration tests for request execution against a mock API.
//!
//! These tests verify that the RequestExecutor:
//! - Serves repeated GETs from the response cache
//! - Invalidates cached entries after mutations
//! - Retries transient failures and gives up on client errors
//! - Surfaces non-2xx responses as ApiError

use std::sync::Arc;
use std::time::Duration;

use idforge_core::{
    ApiRequest, IdentityClient, JsonSchema, MemoryStore, NewUser, RequestError, RequestExecutor,
    ResponseCache, RetryPolicy, Secret, StaticToken, StoredCredentials, TokenManager,
};
use serde::Deserialize;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path, query_param},
};

const USERS_PATH: &str = "/environments/env-1/users";

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5))
}

/// Helper to create an executor with a fixed bearer token.
fn test_executor(server: &MockServer) -> RequestExecutor<StaticToken> {
    RequestExecutor::new(StaticToken(Secret::new("test-token")), server.uri())
        .with_retry_policy(fast_retry())
}

fn user_json(id: &str, username: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "username": username,
        "email": format!("{}@example.com", username),
        "enabled": true
    })
}

fn users_page(users: Vec<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({
        "_embedded": { "users": users },
        "count": 1
    })
}

#[tokio::test]
async fn test_get_is_cached() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{}/u1", USERS_PATH)))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_json("u1", "ada")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = IdentityClient::new(test_executor(&mock_server), "env-1");

    let first = client.get_user("u1").await.unwrap();
    let second = client.get_user("u1").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.username, "ada");
    assert_eq!(client.executor().cache().len(), 1);
}

#[tokio::test]
async fn test_query_string_is_part_of_cache_key() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(USERS_PATH))
        .and(query_param("filter", "username eq \"ada\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(users_page(vec![user_json("u1", "ada")])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(USERS_PATH))
        .and(query_param("filter", "username eq \"bob\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(users_page(vec![user_json("u2", "bob")])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = IdentityClient::new(test_executor(&mock_server), "env-1");

    let ada = client.list_users(Some("username eq \"ada\"")).await.unwrap();
    let bob = client.list_users(Some("username eq \"bob\"")).await.unwrap();
    let ada_again = client.list_users(Some("username eq \"ada\"")).await.unwrap();

    assert_eq!(ada[0].id, "u1");
    assert_eq!(bob[0].id, "u2");
    assert_eq!(ada, ada_again);
}

#[tokio::test]
async fn test_delete_invalidates_cached_entries() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{}/u1", USERS_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_json("u1", "ada")))
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(USERS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(users_page(vec![user_json("u1", "ada")])))
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path(format!("{}/u1", USERS_PATH)))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = IdentityClient::new(test_executor(&mock_server), "env-1");

    client.get_user("u1").await.unwrap();
    client.list_users(None).await.unwrap();
    assert_eq!(client.executor().cache().len(), 2);

    client.delete_user("u1").await.unwrap();
    assert!(client.executor().cache().is_empty());

    // Both the item and its collection are fetched again.
    client.get_user("u1").await.unwrap();
    client.list_users(None).await.unwrap();
}

#[tokio::test]
async fn test_delete_with_text_body_still_invalidates() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{}/u1", USERS_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_json("u1", "ada")))
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path(format!("{}/u1", USERS_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_string("deleted"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = IdentityClient::new(test_executor(&mock_server), "env-1");

    client.get_user("u1").await.unwrap();
    assert_eq!(client.executor().cache().len(), 1);

    let err = client.delete_user("u1").await.unwrap_err();
    assert!(matches!(err, RequestError::Validation(_)));
    assert!(client.executor().cache().is_empty());

    client.get_user("u1").await.unwrap();
}

#[tokio::test]
async fn test_post_is_never_cached() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(USERS_PATH))
        .respond_with(ResponseTemplate::new(201).set_body_json(user_json("u9", "grace")))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = IdentityClient::new(test_executor(&mock_server), "env-1");
    let new_user = NewUser {
        username: "grace".into(),
        email: "grace@example.com".into(),
        name: None,
        population: None,
    };

    let first = client.create_user(&new_user).await.unwrap();
    let second = client.create_user(&new_user).await.unwrap();
    assert_eq!(first.id, "u9");
    assert_eq!(second.id, "u9");
    assert!(client.executor().cache().is_empty());
}

#[tokio::test]
async fn test_service_unavailable_retried_to_limit() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{}/u1", USERS_PATH)))
        .respond_with(ResponseTemplate::new(503))
        .expect(4)
        .mount(&mock_server)
        .await;

    let client = IdentityClient::new(test_executor(&mock_server), "env-1");

    let err = client.get_user("u1").await.unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert!(client.executor().cache().is_empty());
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{}/missing", USERS_PATH)))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "code": "NOT_FOUND",
            "message": "The requested resource was not found."
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = IdentityClient::new(test_executor(&mock_server), "env-1");

    match client.get_user("missing").await.unwrap_err() {
        RequestError::Api(err) => {
            assert!(err.is_not_found());
            assert_eq!(err.message, "The requested resource was not found.");
            assert_eq!(err.error_code.as_deref(), Some("NOT_FOUND"));
        }
        other => panic!("expected ApiError, got {:?}", other),
    }
}

#[tokio::test]
async fn test_throttled_request_honors_retry_after() {
    let mock_server = MockServer::start().await;

    // Mounted first, so it answers the first request only.
    Mock::given(method("GET"))
        .and(path(format!("{}/u1", USERS_PATH)))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{}/u1", USERS_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_json("u1", "ada")))
        .expect(1)
        .mount(&mock_server)
        .await;

    // A long backoff would time the test out if Retry-After were ignored.
    let executor = RequestExecutor::new(StaticToken(Secret::new("test-token")), mock_server.uri())
        .with_retry_policy(RetryPolicy::new(
            1,
            Duration::from_secs(60),
            Duration::from_secs(60),
        ));
    let client = IdentityClient::new(executor, "env-1");

    let user = tokio::time::timeout(Duration::from_secs(5), client.get_user("u1"))
        .await
        .expect("retry should follow Retry-After")
        .unwrap();
    assert_eq!(user.id, "u1");
}

#[tokio::test]
async fn test_validation_error_details_in_api_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(USERS_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "code": "INVALID_DATA",
            "message": "The request could not be completed.",
            "details": [{"target": "email", "message": "must be a valid email"}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = IdentityClient::new(test_executor(&mock_server), "env-1");
    let new_user = NewUser {
        username: "grace".into(),
        email: "not-an-email".into(),
        name: None,
        population: None,
    };

    match client.create_user(&new_user).await.unwrap_err() {
        RequestError::Api(err) => {
            assert_eq!(err.status, 400);
            assert_eq!(err.error_code.as_deref(), Some("INVALID_DATA"));
            assert!(err.message.contains("email: must be a valid email"));
        }
        other => panic!("expected ApiError, got {:?}", other),
    }
}

#[derive(Debug, Deserialize)]
struct UserSummary {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UserWithDepartment {
    department: String,
}

#[tokio::test]
async fn test_cached_body_revalidated_per_caller() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{}/u1", USERS_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_json("u1", "ada")))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{}/u1", USERS_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "u1",
            "username": "ada",
            "department": "Engineering"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let executor = test_executor(&mock_server);
    let request = ApiRequest::get(format!("{}/u1", USERS_PATH));

    let summary: UserSummary = executor
        .execute(&request, &JsonSchema::<UserSummary>::new())
        .await
        .unwrap();
    assert_eq!(summary.id, "u1");

    // The cached body lacks `department`, so this caller triggers a refetch.
    let detailed: UserWithDepartment = executor
        .execute(&request, &JsonSchema::<UserWithDepartment>::new())
        .await
        .unwrap();
    assert_eq!(detailed.department, "Engineering");

    // The refreshed entry still satisfies the first caller.
    let summary: UserSummary = executor
        .execute(&request, &JsonSchema::<UserSummary>::new())
        .await
        .unwrap();
    assert_eq!(summary.id, "u1");
}

#[tokio::test]
async fn test_shared_cache_across_executors() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{}/u1", USERS_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_json("u1", "ada")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let cache = ResponseCache::new(Duration::from_secs(60));
    let first = IdentityClient::new(test_executor(&mock_server).with_cache(cache.clone()), "env-1");
    let second = IdentityClient::new(test_executor(&mock_server).with_cache(cache), "env-1");

    first.get_user("u1").await.unwrap();
    second.get_user("u1").await.unwrap();
}

#[tokio::test]
async fn test_different_tokens_do_not_share_entries() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{}/u1", USERS_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_json("u1", "ada")))
        .expect(2)
        .mount(&mock_server)
        .await;

    let cache = ResponseCache::default();
    let first = RequestExecutor::new(StaticToken(Secret::new("token-a")), mock_server.uri())
        .with_cache(cache.clone());
    let second = RequestExecutor::new(StaticToken(Secret::new("token-b")), mock_server.uri())
        .with_cache(cache);

    let request = ApiRequest::get(format!("{}/u1", USERS_PATH));
    let schema = JsonSchema::<serde_json::Value>::new();
    first.execute(&request, &schema).await.unwrap();
    second.execute(&request, &schema).await.unwrap();
}

#[tokio::test]
async fn test_end_to_end_with_token_manager() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/env-1/as/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "exchanged-token",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/environments/env-1/groups"))
        .and(header("authorization", "Bearer exchanged-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "_embedded": { "groups": [{"id": "g1", "name": "Admins"}] }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/environments/env-1/groups/g1"))
        .and(header("authorization", "Bearer exchanged-token"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let credentials = StoredCredentials::new(
        "client",
        Secret::new("secret"),
        "env-1",
        format!("{}/env-1/as/token", mock_server.uri()),
    );
    let manager = Arc::new(TokenManager::new(MemoryStore::with_credentials(credentials)));
    let client = IdentityClient::new(
        RequestExecutor::new(manager.clone(), mock_server.uri()).with_retry_policy(fast_retry()),
        "env-1",
    );

    let groups = client.list_groups().await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].name, "Admins");

    client.delete_group("g1").await.unwrap();
    assert!(manager.get_auth_status().await.has_valid_token);
}

#[tokio::test]
async fn test_missing_credentials_fail_before_network() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let manager = Arc::new(TokenManager::new(MemoryStore::new()));
    let client = IdentityClient::new(RequestExecutor::new(manager, mock_server.uri()), "env-1");

    match client.list_users(None).await.unwrap_err() {
        RequestError::Auth(err) => assert!(err.is_missing_credentials()),
        other => panic!("expected auth error, got {:?}", other),
    }
}
