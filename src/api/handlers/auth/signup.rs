//! Account creation.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use crate::crypto::{encrypt, hash_password};

use super::{
    session::{extract_session_token, session_cookie},
    session_state::SessionState,
    state::AuthState,
    storage::{delete_session, insert_session, insert_user, NewUser, SignupOutcome},
    types::{ErrorResponse, SignupRequest, SignupResponse, UserSummaryResponse},
    utils::{hash_session_token, normalize_email, valid_email, valid_password},
};

const MISSING_FIELDS: &str = "first_name, email, and password are required";
const WEAK_PASSWORD: &str = "Password must be at least 8 characters long, contain 1 uppercase letter, 1 lowercase letter, 1 number, and 1 special character.";

#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created", body = SignupResponse),
        (status = 400, description = "Missing fields or weak password", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
        (status = 500, description = "Internal error", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn signup(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignupRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(MISSING_FIELDS)),
        )
            .into_response();
    };

    let first_name = request
        .first_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());
    let email = request
        .email
        .as_deref()
        .filter(|email| !email.trim().is_empty());
    let password = request
        .password
        .as_deref()
        .filter(|password| !password.is_empty());

    let (Some(first_name), Some(email), Some(password)) = (first_name, email, password) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(MISSING_FIELDS)),
        )
            .into_response();
    };

    // The policy is authoritative here regardless of any client-side check.
    if !valid_password(password) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(WEAK_PASSWORD)),
        )
            .into_response();
    }

    let email = normalize_email(email);
    if !valid_email(&email) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Invalid email format")),
        )
            .into_response();
    }

    let password_owned = password.to_string();
    let password_hash =
        match tokio::task::spawn_blocking(move || hash_password(&password_owned)).await {
            Ok(Ok(hash)) => hash,
            Ok(Err(err)) => {
                error!("Failed to hash password: {err}");
                return internal_error();
            }
            Err(err) => {
                error!("Password hashing task failed: {err}");
                return internal_error();
            }
        };

    let phone = request
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|phone| !phone.is_empty());
    let phone_encrypted = match phone {
        Some(phone) => match encrypt(auth_state.encryption_key(), phone) {
            Ok(blob) => Some(blob),
            Err(err) => {
                error!("Failed to encrypt phone: {err}");
                return internal_error();
            }
        },
        None => None,
    };

    let last_name = request
        .last_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());

    let outcome = insert_user(
        &pool,
        NewUser {
            first_name,
            last_name,
            email: &email,
            phone_encrypted: phone_encrypted.as_deref(),
            password_hash: &password_hash,
        },
    )
    .await;

    let summary = match outcome {
        Ok(SignupOutcome::Created(summary)) => summary,
        Ok(SignupOutcome::Conflict) => {
            return (
                StatusCode::CONFLICT,
                Json(ErrorResponse::new("Email already registered")),
            )
                .into_response();
        }
        Err(err) => {
            error!("Failed to create user: {err}");
            return internal_error();
        }
    };

    // Any session carried into signup is superseded, not promoted.
    let session_secret = auth_state.config().session_secret();
    if let Some(old_token) = extract_session_token(&headers) {
        let old_hash = hash_session_token(session_secret, &old_token);
        if let Err(err) = delete_session(&pool, &old_hash).await {
            error!("Failed to delete superseded session: {err}");
        }
    }

    let token = match insert_session(
        &pool,
        session_secret,
        SessionState::Registered(summary.id),
        None,
        auth_state.config().session_ttl_seconds(),
    )
    .await
    {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to create session: {err}");
            return internal_error();
        }
    };

    let mut response_headers = HeaderMap::new();
    match session_cookie(auth_state.config(), &token) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("Failed to build session cookie: {err}");
            return internal_error();
        }
    }

    let body = SignupResponse {
        message: "Signup successful".to_string(),
        user: UserSummaryResponse {
            id: summary.id.to_string(),
            first_name: summary.first_name,
            last_name: summary.last_name,
            email: summary.email,
        },
    };
    (StatusCode::CREATED, response_headers, Json(body)).into_response()
}

fn internal_error() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("Internal server error")),
    )
        .into_response()
}
