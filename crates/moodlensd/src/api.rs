//! HTTP routes: account management plus emotion prediction.

use crate::identity::{IdentityError, IdentityGateway, UserIdentity};
use actix_cors::Cors;
use actix_web::{
    error::JsonPayloadError,
    http::{header, StatusCode},
    web::{self, Data, Json},
    HttpRequest, HttpResponse, ResponseError,
};
use moodlens_core::PredictionPipeline;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Shared per-process state handed to every handler.
pub struct AppState {
    pub pipeline: Arc<PredictionPipeline>,
    pub identity: Arc<dyn IdentityGateway>,
}

/// Handler failure, rendered as `{"error": "<message>"}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Internal(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    /// `data:<mime>;base64,<payload>`
    pub image: String,
}

#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: String,
    pub email: String,
    pub username: String,
}

impl UserView {
    fn new(user: UserIdentity, username: String) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub message: &'static str,
    pub user: UserView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

/// Route table. Each JSON route carries its own extractor config so an
/// unreadable body fails with the same status as any other failure on that
/// route: 401 on `/login`, 500 on `/signup` and `/predict`.
pub fn routes(max_payload_bytes: usize) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.service(
            web::resource("/signup")
                .app_data(json_config(max_payload_bytes, ApiError::Internal))
                .route(web::post().to(signup)),
        )
        .service(
            web::resource("/login")
                .app_data(json_config(max_payload_bytes, |message| {
                    ApiError::Unauthorized(format!("Login failed: {message}"))
                }))
                .route(web::post().to(login)),
        )
        .service(web::resource("/logout").route(web::post().to(logout)))
        .service(web::resource("/check-auth").route(web::get().to(check_auth)))
        .service(
            web::resource("/predict")
                .app_data(json_config(max_payload_bytes, ApiError::Internal))
                .route(web::post().to(predict)),
        );
    }
}

/// JSON extractor settings: body size limit, with rejections rendered as
/// `{"error": ...}` through `reject`.
fn json_config(limit: usize, reject: fn(String) -> ApiError) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(limit)
        .error_handler(move |err: JsonPayloadError, req: &HttpRequest| {
            warn!(path = req.path(), error = %err, "rejected request body");
            reject(format!("invalid request body: {err}")).into()
        })
}

/// Credentialed CORS. An empty origin list echoes back any origin.
pub fn cors(allowed_origins: &[String]) -> Cors {
    let cors = Cors::default()
        .allow_any_method()
        .allow_any_header()
        .supports_credentials()
        .max_age(3600);

    if allowed_origins.is_empty() {
        cors.allow_any_origin()
    } else {
        allowed_origins
            .iter()
            .fold(cors, |cors, origin| cors.allowed_origin(origin))
    }
}

async fn signup(
    state: Data<AppState>,
    request: Json<SignupRequest>,
) -> Result<HttpResponse, ApiError> {
    let SignupRequest {
        email,
        password,
        username,
    } = request.into_inner();
    let (email, password) = required_credentials(email, password)
        .ok_or_else(|| ApiError::BadRequest("email and password are required".into()))?;
    let username = username
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| local_part(&email).to_string());

    info!(email = %email, "signup requested");

    let created = state
        .identity
        .sign_up(&email, &password, &username)
        .await
        .map_err(|e| {
            warn!(error = %e, "signup failed");
            match e {
                IdentityError::Rejected(message) => ApiError::BadRequest(message),
                IdentityError::InvalidCredentials => {
                    ApiError::BadRequest("Invalid credentials".into())
                }
                other => ApiError::Internal(other.to_string()),
            }
        })?
        .ok_or_else(|| ApiError::BadRequest("Failed to create user".into()))?;

    info!(user_id = %created.id, "user created");

    match state.identity.sign_in(&email, &password).await {
        Ok((user, session)) => Ok(HttpResponse::Ok().json(AuthResponse {
            message: "User created and logged in successfully",
            user: UserView::new(user, username),
            session: Some(session.access_token),
        })),
        Err(e) => {
            info!(error = %e, "automatic login after signup failed");
            Ok(HttpResponse::Ok().json(AuthResponse {
                message: "User created successfully. Please login.",
                user: UserView::new(created, username),
                session: None,
            }))
        }
    }
}

async fn login(
    state: Data<AppState>,
    request: Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let LoginRequest { email, password } = request.into_inner();
    let (email, password) = required_credentials(email, password).ok_or_else(|| {
        ApiError::Unauthorized("Login failed: email and password are required".into())
    })?;

    info!(email = %email, "login requested");

    let (user, session) = state
        .identity
        .sign_in(&email, &password)
        .await
        .map_err(|e| {
            warn!(error = %e, "login failed");
            match e {
                IdentityError::InvalidCredentials => {
                    ApiError::Unauthorized("Invalid credentials".into())
                }
                other => ApiError::Unauthorized(format!("Login failed: {other}")),
            }
        })?;

    let username =
        resolve_username(state.identity.as_ref(), &user, &session.access_token, &email).await;

    Ok(HttpResponse::Ok().json(AuthResponse {
        message: "Login successful",
        user: UserView::new(user, username),
        session: Some(session.access_token),
    }))
}

async fn logout(state: Data<AppState>, req: HttpRequest) -> HttpResponse {
    if let Some(token) = bearer_token(&req) {
        if let Err(e) = state.identity.sign_out(&token).await {
            warn!(error = %e, "token revocation failed");
        }
    }
    HttpResponse::Ok().json(json!({ "message": "Logged out successfully" }))
}

async fn check_auth(state: Data<AppState>, req: HttpRequest) -> HttpResponse {
    let Some(token) = bearer_token(&req) else {
        return unauthenticated();
    };

    match state.identity.verify(&token).await {
        Ok(Some(user)) => {
            let fallback = user.email.clone();
            let username =
                resolve_username(state.identity.as_ref(), &user, &token, &fallback).await;
            HttpResponse::Ok().json(json!({
                "authenticated": true,
                "user": UserView::new(user, username),
            }))
        }
        Ok(None) => unauthenticated(),
        Err(e) => {
            warn!(error = %e, "token verification failed");
            unauthenticated()
        }
    }
}

async fn predict(
    state: Data<AppState>,
    request: Json<PredictRequest>,
) -> Result<HttpResponse, ApiError> {
    let image = request.into_inner().image;
    info!(bytes = image.len(), "prediction requested");

    let pipeline = Arc::clone(&state.pipeline);
    let results = web::block(move || pipeline.run(&image))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| {
            error!(error = %e, "prediction failed");
            ApiError::Internal(e.to_string())
        })?;

    Ok(HttpResponse::Ok().json(results))
}

fn unauthenticated() -> HttpResponse {
    HttpResponse::Unauthorized().json(json!({ "authenticated": false }))
}

fn required_credentials(
    email: Option<String>,
    password: Option<String>,
) -> Option<(String, String)> {
    let email = email.map(|e| e.trim().to_string()).filter(|e| !e.is_empty())?;
    let password = password.filter(|p| !p.is_empty())?;
    Some((email, password))
}

/// Token from `Authorization: Bearer <token>`; a bare token is accepted too.
fn bearer_token(req: &HttpRequest) -> Option<String> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}

/// Profile username, else the local part of `fallback_email`.
async fn resolve_username(
    identity: &dyn IdentityGateway,
    user: &UserIdentity,
    access_token: &str,
    fallback_email: &str,
) -> String {
    match identity.profile_username(&user.id, access_token).await {
        Ok(Some(username)) => username,
        Ok(None) => local_part(fallback_email).to_string(),
        Err(e) => {
            warn!(user_id = %user.id, error = %e, "profile lookup failed");
            local_part(fallback_email).to_string()
        }
    }
}
