//! Typed resource operations.
//!
//! [`IdentityClient`] builds requests for users, groups, populations,
//! applications and sessions of one environment and hands them to the
//! [`RequestExecutor`]. It does no caching or retrying of its own.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RequestError;
use crate::executor::{ApiRequest, RequestExecutor};
use crate::token::TokenSource;
use crate::validate::{AnyJson, JsonSchema, ValidationError, Validator};

/// Reference to another resource by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserName {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<UserName>,
    #[serde(default)]
    pub population: Option<ResourceRef>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Body for creating a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub username: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<UserName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub population: Option<ResourceRef>,
}

/// Partial update of a user; absent fields are left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<UserName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Population {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub user_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Validates a collection response of the form
/// `{"_embedded": {"<key>": [...]}}`.
pub struct EmbeddedList<T> {
    key: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> EmbeddedList<T> {
    pub fn new(key: &'static str) -> Self {
        Self {
            key,
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Validator<Vec<T>> for EmbeddedList<T> {
    fn validate(&self, value: &Value) -> Result<Vec<T>, ValidationError> {
        let field = format!("_embedded.{}", self.key);
        let items = value
            .get("_embedded")
            .and_then(|embedded| embedded.get(self.key))
            .ok_or_else(|| ValidationError::for_field(&field, "collection missing"))?;

        Vec::<T>::deserialize(items)
            .map_err(|e| ValidationError::for_field(field, e.to_string()))
    }
}

fn path_segment<'a>(field: &str, id: &'a str) -> Result<&'a str, RequestError> {
    if id.is_empty() || id.contains(['/', '?', '#']) || id.chars().any(char::is_whitespace) {
        return Err(ValidationError::for_field(field, format!("invalid id '{}'", id)).into());
    }
    Ok(id)
}

/// Resource operations for a single environment.
pub struct IdentityClient<P: TokenSource> {
    executor: RequestExecutor<P>,
    environment_id: String,
}

impl<P: TokenSource> IdentityClient<P> {
    pub fn new(executor: RequestExecutor<P>, environment_id: impl Into<String>) -> Self {
        Self {
            executor,
            environment_id: environment_id.into(),
        }
    }

    pub fn executor(&self) -> &RequestExecutor<P> {
        &self.executor
    }

    pub fn environment_id(&self) -> &str {
        &self.environment_id
    }

    fn collection(&self, resource: &str) -> String {
        format!("/environments/{}/{}", self.environment_id, resource)
    }

    fn item(&self, resource: &str, field: &str, id: &str) -> Result<String, RequestError> {
        Ok(format!("{}/{}", self.collection(resource), path_segment(field, id)?))
    }

    async fn fetch<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, RequestError> {
        self.executor
            .execute(&request, &JsonSchema::<T>::new())
            .await
    }

    async fn discard(&self, request: ApiRequest) -> Result<(), RequestError> {
        self.executor.execute(&request, &AnyJson).await.map(|_| ())
    }

    fn to_body<B: Serialize>(body: &B) -> Result<Value, RequestError> {
        serde_json::to_value(body)
            .map_err(|e| ValidationError::new(format!("unserializable request body: {}", e)).into())
    }

    // Users

    /// List users, optionally narrowed by a SCIM-style filter expression.
    pub async fn list_users(&self, filter: Option<&str>) -> Result<Vec<User>, RequestError> {
        let mut request = ApiRequest::get(self.collection("users"));
        if let Some(filter) = filter {
            request = request.with_query("filter", filter);
        }
        self.executor
            .execute(&request, &EmbeddedList::<User>::new("users"))
            .await
    }

    pub async fn get_user(&self, user_id: &str) -> Result<User, RequestError> {
        self.fetch(ApiRequest::get(self.item("users", "userId", user_id)?))
            .await
    }

    pub async fn create_user(&self, user: &NewUser) -> Result<User, RequestError> {
        self.fetch(ApiRequest::post(self.collection("users"), Self::to_body(user)?))
            .await
    }

    pub async fn update_user(&self, user_id: &str, update: &UserUpdate) -> Result<User, RequestError> {
        self.fetch(ApiRequest::patch(
            self.item("users", "userId", user_id)?,
            Self::to_body(update)?,
        ))
        .await
    }

    pub async fn delete_user(&self, user_id: &str) -> Result<(), RequestError> {
        self.discard(ApiRequest::delete(self.item("users", "userId", user_id)?))
            .await
    }

    /// End one of a user's sessions.
    pub async fn delete_user_session(&self, user_id: &str, session_id: &str) -> Result<(), RequestError> {
        let path = format!(
            "{}/sessions/{}",
            self.item("users", "userId", user_id)?,
            path_segment("sessionId", session_id)?
        );
        self.discard(ApiRequest::delete(path)).await
    }

    // Groups

    pub async fn list_groups(&self) -> Result<Vec<Group>, RequestError> {
        self.executor
            .execute(
                &ApiRequest::get(self.collection("groups")),
                &EmbeddedList::<Group>::new("groups"),
            )
            .await
    }

    pub async fn get_group(&self, group_id: &str) -> Result<Group, RequestError> {
        self.fetch(ApiRequest::get(self.item("groups", "groupId", group_id)?))
            .await
    }

    pub async fn create_group(&self, name: &str, description: Option<&str>) -> Result<Group, RequestError> {
        let mut body = serde_json::json!({ "name": name });
        if let Some(description) = description {
            body["description"] = Value::from(description);
        }
        self.fetch(ApiRequest::post(self.collection("groups"), body))
            .await
    }

    pub async fn delete_group(&self, group_id: &str) -> Result<(), RequestError> {
        self.discard(ApiRequest::delete(self.item("groups", "groupId", group_id)?))
            .await
    }

    // Populations

    pub async fn list_populations(&self) -> Result<Vec<Population>, RequestError> {
        self.executor
            .execute(
                &ApiRequest::get(self.collection("populations")),
                &EmbeddedList::<Population>::new("populations"),
            )
            .await
    }

    pub async fn get_population(&self, population_id: &str) -> Result<Population, RequestError> {
        self.fetch(ApiRequest::get(
            self.item("populations", "populationId", population_id)?,
        ))
        .await
    }

    // Applications

    pub async fn list_applications(&self) -> Result<Vec<Application>, RequestError> {
        self.executor
            .execute(
                &ApiRequest::get(self.collection("applications")),
                &EmbeddedList::<Application>::new("applications"),
            )
            .await
    }

    pub async fn get_application(&self, application_id: &str) -> Result<Application, RequestError> {
        self.fetch(ApiRequest::get(
            self.item("applications", "applicationId", application_id)?,
        ))
        .await
    }
}
