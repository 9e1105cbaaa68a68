//! TOTP second-factor endpoints: setup (QR provisioning) and verify.
//!
//! Verify serves two flows with one endpoint. A pending-login session (or a
//! user with 2FA already enabled) is checked against the stored secret; a
//! session that stashed a fresh secret during setup is completing enrollment,
//! which commits the secret and issues recovery codes.

pub(crate) mod recovery;

use axum::{
    extract::{Extension, Query},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use crate::crypto::{decrypt, encrypt};

use super::auth::{
    session::{resolve_session_row, session_cookie},
    session_state::SessionState,
    state::AuthState,
    storage::{commit_totp_enrollment, fetch_twofa_user, rotate_session, set_enroll_secret},
    types::{
        ErrorResponse, TwofaSetupQuery, TwofaSetupResponse, TwofaVerifyRequest,
        TwofaVerifyResponse,
    },
};
use recovery::RecoveryCodeBatch;

#[utoipa::path(
    get,
    path = "/twofa/setup",
    params(TwofaSetupQuery),
    responses(
        (status = 200, description = "QR code for the authenticator app", body = TwofaSetupResponse),
        (status = 400, description = "Unsupported method", body = ErrorResponse),
        (status = 401, description = "No session", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 500, description = "Stored secret unreadable", body = ErrorResponse)
    ),
    tag = "twofa"
)]
pub async fn setup(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    query: Query<TwofaSetupQuery>,
) -> impl IntoResponse {
    let method = query.method.as_deref().unwrap_or_default().to_lowercase();
    if method != "app" {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Only 'app' method supported.")),
        )
            .into_response();
    }

    let resolved = match resolve_session_row(&headers, &pool, &auth_state).await {
        Ok(resolved) => resolved,
        Err(status) => return status.into_response(),
    };
    // Registered, pending, and authenticated sessions may all provision.
    let Some((token_hash, row)) = resolved else {
        return authenticate_first();
    };
    let Some(user_id) = row.state.user_id() else {
        return authenticate_first();
    };

    let user = match fetch_twofa_user(&pool, user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new("User not found.")),
            )
                .into_response();
        }
        Err(err) => {
            error!("Failed to fetch 2FA user: {err}");
            return setup_failed();
        }
    };

    // Already enabled: re-render the QR for the stored secret and leave the
    // session untouched.
    if user.twofa_enabled {
        let Some(blob) = user.twofa_secret else {
            error!("User {user_id} has 2FA enabled but no stored secret");
            return secret_unreadable();
        };
        let secret = match decrypt(auth_state.encryption_key(), &blob) {
            Ok(secret) => secret,
            Err(err) => {
                error!("Decryption error for twofa_secret: {err}");
                return secret_unreadable();
            }
        };
        return match auth_state.totp().qr_data_url(&secret, &user.email) {
            Ok(qr) => (StatusCode::OK, Json(TwofaSetupResponse { qr })).into_response(),
            Err(err) => {
                error!("Failed to render QR: {err}");
                setup_failed()
            }
        };
    }

    // Enrollment: the fresh secret lives only on the session row until the
    // first code verifies.
    let provisioned = match auth_state.totp().provision(&user.email) {
        Ok(provisioned) => provisioned,
        Err(err) => {
            error!("Failed to provision TOTP secret: {err}");
            return setup_failed();
        }
    };
    let enroll_blob = match encrypt(auth_state.encryption_key(), &provisioned.secret_base32) {
        Ok(blob) => blob,
        Err(err) => {
            error!("Failed to encrypt enrollment secret: {err}");
            return setup_failed();
        }
    };
    if let Err(err) = set_enroll_secret(&pool, &token_hash, Some(&enroll_blob)).await {
        error!("Failed to stash enrollment secret: {err}");
        return setup_failed();
    }

    match auth_state
        .totp()
        .qr_data_url(&provisioned.secret_base32, &user.email)
    {
        Ok(qr) => (StatusCode::OK, Json(TwofaSetupResponse { qr })).into_response(),
        Err(err) => {
            error!("Failed to render QR: {err}");
            setup_failed()
        }
    }
}

#[utoipa::path(
    post,
    path = "/twofa/verify",
    request_body = TwofaVerifyRequest,
    responses(
        (status = 200, description = "Code accepted; recovery codes on first enable", body = TwofaVerifyResponse),
        (status = 400, description = "Malformed request or setup not initiated", body = ErrorResponse),
        (status = 401, description = "No session or invalid code", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 500, description = "Internal error", body = ErrorResponse)
    ),
    tag = "twofa"
)]
pub async fn verify(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<TwofaVerifyRequest>>,
) -> impl IntoResponse {
    let (method, code) = match payload {
        Some(Json(TwofaVerifyRequest {
            method: Some(method),
            token: Some(token),
        })) if !token.trim().is_empty() => (method, token),
        _ => return invalid_request(),
    };
    if method != "app" {
        return invalid_request();
    }

    let resolved = match resolve_session_row(&headers, &pool, &auth_state).await {
        Ok(resolved) => resolved,
        Err(status) => return status.into_response(),
    };
    let Some((token_hash, row)) = resolved else {
        return authenticate_first();
    };
    let Some(user_id) = row.state.user_id() else {
        return authenticate_first();
    };

    let user = match fetch_twofa_user(&pool, user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new("User not found.")),
            )
                .into_response();
        }
        Err(err) => {
            error!("Failed to fetch 2FA user: {err}");
            return verify_failed();
        }
    };

    let pending = matches!(row.state, SessionState::PendingSecondFactor(_));

    if pending || user.twofa_enabled {
        // Login verification against the committed secret.
        let Some(blob) = user.twofa_secret else {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("2FA not set up.")),
            )
                .into_response();
        };
        let secret = match decrypt(auth_state.encryption_key(), &blob) {
            Ok(secret) => secret,
            Err(err) => {
                error!("Decryption error for twofa_secret: {err}");
                return secret_unreadable();
            }
        };
        if !auth_state.totp().verify(&secret, code.trim()) {
            return invalid_code();
        }

        return promote(&pool, &auth_state, &token_hash, user_id, None).await;
    }

    // Enrollment verification against the secret stashed at setup.
    let Some(enroll_blob) = row.enroll_secret else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Setup not initiated.")),
        )
            .into_response();
    };
    let secret = match decrypt(auth_state.encryption_key(), &enroll_blob) {
        Ok(secret) => secret,
        Err(err) => {
            error!("Decryption error for enrollment secret: {err}");
            return secret_unreadable();
        }
    };
    if !auth_state.totp().verify(&secret, code.trim()) {
        return invalid_code();
    }

    // Commit: the secret, the flag, and the recovery codes land in one
    // transaction, so 2FA is never enabled with the codes missing.
    let encrypted_secret = match encrypt(auth_state.encryption_key(), &secret) {
        Ok(blob) => blob,
        Err(err) => {
            error!("Failed to encrypt TOTP secret: {err}");
            return verify_failed();
        }
    };
    let batch = match RecoveryCodeBatch::generate() {
        Ok(batch) => batch,
        Err(err) => {
            error!("Failed to generate recovery codes: {err}");
            return verify_failed();
        }
    };
    if let Err(err) =
        commit_totp_enrollment(&pool, user_id, &encrypted_secret, &batch.code_hashes).await
    {
        error!("Failed to commit enrollment: {err}");
        return verify_failed();
    }

    promote(&pool, &auth_state, &token_hash, user_id, Some(batch.codes)).await
}

/// Rotate the session into the authenticated state and answer with the
/// fresh cookie.
async fn promote(
    pool: &PgPool,
    auth_state: &AuthState,
    token_hash: &[u8],
    user_id: uuid::Uuid,
    recovery_codes: Option<Vec<String>>,
) -> axum::response::Response {
    let rotated = rotate_session(
        pool,
        auth_state.config().session_secret(),
        token_hash,
        SessionState::Authenticated(user_id),
        auth_state.config().session_ttl_seconds(),
    )
    .await;

    let token = match rotated {
        Ok(Some(token)) => token,
        // The session disappeared between lookup and promotion.
        Ok(None) => return authenticate_first(),
        Err(err) => {
            error!("Failed to promote session: {err}");
            return verify_failed();
        }
    };

    let mut response_headers = HeaderMap::new();
    match session_cookie(auth_state.config(), &token) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("Failed to build session cookie: {err}");
            return verify_failed();
        }
    }

    (
        StatusCode::OK,
        response_headers,
        Json(TwofaVerifyResponse {
            success: true,
            recovery_codes,
        }),
    )
        .into_response()
}

fn authenticate_first() -> axum::response::Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse::new("Authenticate first.")),
    )
        .into_response()
}

fn invalid_request() -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::new("Invalid request.")),
    )
        .into_response()
}

fn invalid_code() -> axum::response::Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse::new("Invalid code.")),
    )
        .into_response()
}

fn secret_unreadable() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("Failed to process 2FA secret.")),
    )
        .into_response()
}

fn setup_failed() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("2FA setup failed.")),
    )
        .into_response()
}

fn verify_failed() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("2FA verification failed.")),
    )
        .into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::recovery::RecoveryCodeBatch;

    // In-memory model of the enrollment commit: the flag, the secret, and
    // the stored hashes change together or not at all, mirroring the single
    // transaction in storage.
    #[derive(Default)]
    struct UserRecord {
        twofa_enabled: bool,
        twofa_secret: Option<String>,
        recovery_hashes: Vec<String>,
    }

    fn commit(
        record: &mut UserRecord,
        encrypted_secret: &str,
        batch: &RecoveryCodeBatch,
        storage_fails: bool,
    ) -> Result<(), ()> {
        if storage_fails {
            return Err(());
        }
        record.twofa_secret = Some(encrypted_secret.to_string());
        record.recovery_hashes = batch.code_hashes.clone();
        record.twofa_enabled = true;
        Ok(())
    }

    #[test]
    fn enrollment_commit_is_all_or_nothing() {
        let batch = RecoveryCodeBatch::generate().unwrap();
        let mut record = UserRecord::default();

        // A storage failure must not leave 2FA enabled without codes.
        assert!(commit(&mut record, "sealed", &batch, true).is_err());
        assert!(!record.twofa_enabled);
        assert!(record.twofa_secret.is_none());
        assert!(record.recovery_hashes.is_empty());

        assert!(commit(&mut record, "sealed", &batch, false).is_ok());
        assert!(record.twofa_enabled);
        assert_eq!(record.twofa_secret.as_deref(), Some("sealed"));
        assert_eq!(record.recovery_hashes.len(), batch.code_hashes.len());
    }
}
