//! Authenticated profile endpoint.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use crate::crypto::decrypt;

use super::{
    session::resolve_session,
    session_state::SessionState,
    state::AuthState,
    storage::fetch_profile,
    types::{ErrorResponse, ProfileResponse, ProfileUser},
};

#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current user profile", body = ProfileResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 500, description = "Internal error", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn me(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let state = match resolve_session(&headers, &pool, &auth_state).await {
        Ok(state) => state,
        Err(status) => return status.into_response(),
    };

    // Registered and pending sessions are not logged in.
    let SessionState::Authenticated(user_id) = state else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new("Not authenticated")),
        )
            .into_response();
    };

    let profile = match fetch_profile(&pool, user_id).await {
        Ok(Some(profile)) => profile,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new("User not found")),
            )
                .into_response();
        }
        Err(err) => {
            error!("Failed to fetch profile: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Internal server error")),
            )
                .into_response();
        }
    };

    // An unreadable phone degrades to null rather than failing the request.
    let phone = profile.phone.and_then(|blob| {
        match decrypt(auth_state.encryption_key(), &blob) {
            Ok(phone) => Some(phone),
            Err(err) => {
                error!("Decryption error for phone: {err}");
                None
            }
        }
    });

    let body = ProfileResponse {
        user: ProfileUser {
            id: profile.id.to_string(),
            first_name: profile.first_name,
            last_name: profile.last_name,
            email: profile.email,
            phone,
            twofa_enabled: profile.twofa_enabled,
        },
    };
    (StatusCode::OK, Json(body)).into_response()
}
