//! Credential login.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use crate::crypto::verify_password;

use super::{
    session::{extract_session_token, session_cookie},
    session_state::SessionState,
    state::AuthState,
    storage::{delete_session, fetch_profile, find_login_user, insert_session},
    types::{ErrorResponse, LoginRequest, LoginResponse, UserSummaryResponse},
    utils::{hash_session_token, normalize_email},
};

// One message for every credential failure; the response never says which
// part was wrong.
const INVALID_CREDENTIALS: &str = "Invalid email or password";

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in, or second factor required", body = LoginResponse),
        (status = 400, description = "Missing fields", body = ErrorResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 500, description = "Internal error", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let (email, password) = match payload {
        Some(Json(LoginRequest {
            email: Some(email),
            password: Some(password),
        })) if !email.trim().is_empty() && !password.is_empty() => (email, password),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("email and password are required")),
            )
                .into_response();
        }
    };

    let email = normalize_email(&email);
    let record = match find_login_user(&pool, &email).await {
        Ok(Some(record)) => record,
        Ok(None) => return invalid_credentials(),
        Err(err) => {
            error!("Failed to lookup login user: {err}");
            return internal_error();
        }
    };

    // OAuth-only accounts have no password hash; verify_password treats that
    // as a plain mismatch so the response stays uniform.
    let stored_hash = record.password_hash.clone();
    let verified = match tokio::task::spawn_blocking(move || {
        verify_password(&password, stored_hash.as_deref())
    })
    .await
    {
        Ok(verified) => verified,
        Err(err) => {
            error!("Password verification task failed: {err}");
            return internal_error();
        }
    };
    if !verified {
        return invalid_credentials();
    }

    let session_secret = auth_state.config().session_secret();
    if let Some(old_token) = extract_session_token(&headers) {
        let old_hash = hash_session_token(session_secret, &old_token);
        if let Err(err) = delete_session(&pool, &old_hash).await {
            error!("Failed to delete superseded session: {err}");
        }
    }

    let next_state = if record.twofa_enabled {
        SessionState::PendingSecondFactor(record.user_id)
    } else {
        SessionState::Authenticated(record.user_id)
    };

    let token = match insert_session(
        &pool,
        session_secret,
        next_state,
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

    if record.twofa_enabled {
        let body = LoginResponse {
            success: true,
            twofa_required: Some(true),
            message: Some("2FA required".to_string()),
            user: None,
        };
        return (StatusCode::OK, response_headers, Json(body)).into_response();
    }

    let profile = match fetch_profile(&pool, record.user_id).await {
        Ok(Some(profile)) => profile,
        Ok(None) => {
            error!("Login user {} vanished before profile fetch", record.user_id);
            return internal_error();
        }
        Err(err) => {
            error!("Failed to fetch profile after login: {err}");
            return internal_error();
        }
    };

    let body = LoginResponse {
        success: true,
        twofa_required: None,
        message: None,
        user: Some(UserSummaryResponse {
            id: profile.id.to_string(),
            first_name: profile.first_name,
            last_name: profile.last_name,
            email: profile.email,
        }),
    };
    (StatusCode::OK, response_headers, Json(body)).into_response()
}

fn invalid_credentials() -> axum::response::Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse::new(INVALID_CREDENTIALS)),
    )
        .into_response()
}

fn internal_error() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("Internal server error")),
    )
        .into_response()
}
