//! Identity provider gateway.
//!
//! Account management is delegated to a Supabase project: GoTrue for
//! sign-up, password sign-in, token revocation and token verification, and
//! the `user_profiles` table (PostgREST) for display names. Provider
//! responses are mapped to [`UserIdentity`] / [`Session`] right here so the
//! HTTP layer never sees the provider's JSON.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: String,
    pub email: String,
}

/// Opaque provider session; only the bearer token is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    /// The provider refused the request (duplicate email, weak password, ...).
    #[error("{0}")]
    Rejected(String),
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
    #[error("unexpected identity provider response: {0}")]
    Malformed(String),
    #[error("identity provider is not configured")]
    NotConfigured,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityGateway: Send + Sync {
    /// Register an account. `Ok(None)` means the provider accepted the call
    /// but returned no user.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> Result<Option<UserIdentity>, IdentityError>;

    async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(UserIdentity, Session), IdentityError>;

    /// Revoke the session behind `access_token`.
    async fn sign_out(&self, access_token: &str) -> Result<(), IdentityError>;

    /// Resolve a bearer token. `Ok(None)` means the token is invalid or expired.
    async fn verify(&self, access_token: &str) -> Result<Option<UserIdentity>, IdentityError>;

    /// Username stored in the profile table, if a row exists.
    async fn profile_username(
        &self,
        user_id: &str,
        access_token: &str,
    ) -> Result<Option<String>, IdentityError>;
}

/// [`IdentityGateway`] backed by Supabase REST endpoints.
pub struct SupabaseGateway {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseGateway {
    pub fn new(base_url: &str, anon_key: &str, timeout: Duration) -> Result<Self, IdentityError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(unavailable)?;

        tracing::info!(url = base_url, timeout_secs = timeout.as_secs(), "identity provider configured");

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        })
    }

    fn auth(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("apikey", &self.anon_key)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.base_url)
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn sign_up_request(&self, email: &str, password: &str, username: &str) -> RequestBuilder {
        self.auth(self.client.post(self.auth_url("signup"))).json(&json!({
            "email": email,
            "password": password,
            "data": { "username": username },
        }))
    }

    fn sign_in_request(&self, email: &str, password: &str) -> RequestBuilder {
        self.auth(self.client.post(self.auth_url("token")))
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }))
    }

    fn sign_out_request(&self, access_token: &str) -> RequestBuilder {
        self.auth(self.client.post(self.auth_url("logout")))
            .bearer_auth(access_token)
    }

    fn verify_request(&self, access_token: &str) -> RequestBuilder {
        self.auth(self.client.get(self.auth_url("user")))
            .bearer_auth(access_token)
    }

    fn profile_request(&self, user_id: &str, access_token: &str) -> RequestBuilder {
        self.auth(self.client.get(self.rest_url("user_profiles")))
            .bearer_auth(access_token)
            .query(&[("user_id", format!("eq.{user_id}")), ("select", "username".to_string())])
    }
}

#[async_trait]
impl IdentityGateway for SupabaseGateway {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> Result<Option<UserIdentity>, IdentityError> {
        let response = self
            .sign_up_request(email, password, username)
            .send()
            .await
            .map_err(unavailable)?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body: Value = response.json().await.map_err(malformed)?;
        Ok(user_from_signup(&body))
    }

    async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(UserIdentity, Session), IdentityError> {
        let response = self
            .sign_in_request(email, password)
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(sign_in_error(status, &body));
        }

        let body: Value = response.json().await.map_err(malformed)?;
        session_from_token_response(&body)
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), IdentityError> {
        let response = self
            .sign_out_request(access_token)
            .send()
            .await
            .map_err(unavailable)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }

    async fn verify(&self, access_token: &str) -> Result<Option<UserIdentity>, IdentityError> {
        let response = self
            .verify_request(access_token)
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        let body = response.text().await.map_err(malformed)?;
        user_lookup_result(status, &body)
    }

    async fn profile_username(
        &self,
        user_id: &str,
        access_token: &str,
    ) -> Result<Option<String>, IdentityError> {
        let response = self
            .profile_request(user_id, access_token)
            .send()
            .await
            .map_err(unavailable)?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body: Value = response.json().await.map_err(malformed)?;
        Ok(username_from_profiles(&body))
    }
}

/// Gateway used when no provider URL/key is configured. Every call fails
/// with [`IdentityError::NotConfigured`]; prediction keeps working.
pub struct UnconfiguredGateway;

#[async_trait]
impl IdentityGateway for UnconfiguredGateway {
    async fn sign_up(&self, _: &str, _: &str, _: &str) -> Result<Option<UserIdentity>, IdentityError> {
        Err(IdentityError::NotConfigured)
    }

    async fn sign_in(&self, _: &str, _: &str) -> Result<(UserIdentity, Session), IdentityError> {
        Err(IdentityError::NotConfigured)
    }

    async fn sign_out(&self, _: &str) -> Result<(), IdentityError> {
        Err(IdentityError::NotConfigured)
    }

    async fn verify(&self, _: &str) -> Result<Option<UserIdentity>, IdentityError> {
        Err(IdentityError::NotConfigured)
    }

    async fn profile_username(&self, _: &str, _: &str) -> Result<Option<String>, IdentityError> {
        Err(IdentityError::NotConfigured)
    }
}

fn unavailable(e: reqwest::Error) -> IdentityError {
    IdentityError::Unavailable(e.to_string())
}

fn malformed(e: reqwest::Error) -> IdentityError {
    IdentityError::Malformed(e.to_string())
}

async fn error_from_response(response: Response) -> IdentityError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    classify_failure(status, &body)
}

fn classify_failure(status: StatusCode, body: &str) -> IdentityError {
    let message = provider_message(body).unwrap_or_else(|| status.to_string());
    if status.is_server_error() {
        IdentityError::Unavailable(message)
    } else {
        IdentityError::Rejected(message)
    }
}

fn sign_in_error(status: StatusCode, body: &str) -> IdentityError {
    if matches!(status, StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED) {
        let value: Value = serde_json::from_str(body).unwrap_or(Value::Null);
        let code = value.get("error_code").and_then(Value::as_str);
        let error = value.get("error").and_then(Value::as_str);
        if code == Some("invalid_credentials") || error == Some("invalid_grant") {
            return IdentityError::InvalidCredentials;
        }
    }
    classify_failure(status, body)
}

/// Outcome of a `GET /auth/v1/user` lookup.
///
/// Any 4xx (expired, revoked or garbage token) means "not signed in"; 5xx is
/// a provider failure.
fn user_lookup_result(status: StatusCode, body: &str) -> Result<Option<UserIdentity>, IdentityError> {
    if status.is_client_error() {
        tracing::debug!(%status, "token rejected by identity provider");
        return Ok(None);
    }
    if !status.is_success() {
        return Err(classify_failure(status, body));
    }

    let value: Value =
        serde_json::from_str(body).map_err(|e| IdentityError::Malformed(e.to_string()))?;
    user_from_value(&value)
        .map(Some)
        .ok_or_else(|| IdentityError::Malformed("user response has no id".into()))
}

/// Human-readable message from a GoTrue / PostgREST error body.
fn provider_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["msg", "error_description", "message", "error"]
        .iter()
        .find_map(|key| value.get(*key)?.as_str().map(str::to_owned))
}

fn user_from_value(value: &Value) -> Option<UserIdentity> {
    let id = value.get("id")?.as_str()?.to_string();
    let email = value
        .get("email")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some(UserIdentity { id, email })
}

/// Sign-up answers with a session (`{access_token, user}`) when the project
/// auto-confirms emails, and with the bare user object otherwise.
fn user_from_signup(body: &Value) -> Option<UserIdentity> {
    match body.get("user") {
        Some(user) if user.is_object() => user_from_value(user),
        _ => user_from_value(body),
    }
}

fn session_from_token_response(body: &Value) -> Result<(UserIdentity, Session), IdentityError> {
    let access_token = body
        .get("access_token")
        .and_then(Value::as_str)
        .ok_or_else(|| IdentityError::Malformed("token response has no access_token".into()))?;
    let user = body
        .get("user")
        .and_then(user_from_value)
        .ok_or_else(|| IdentityError::Malformed("token response has no user".into()))?;
    Ok((
        user,
        Session {
            access_token: access_token.to_string(),
        },
    ))
}

fn username_from_profiles(body: &Value) -> Option<String> {
    body.as_array()?
        .first()?
        .get("username")?
        .as_str()
        .map(str::to_owned)
}
