//! Google OAuth 2.0 login (authorization-code flow).
//!
//! `/auth/google` redirects to the provider with a random `state` mirrored in
//! a short-lived cookie; the callback verifies it, exchanges the code, pulls
//! OpenID userinfo, and links the asserted identity to a local account by
//! email. A linked account with 2FA enabled still has to pass the second
//! factor; OAuth never bypasses it.

use axum::{
    extract::{Extension, Query},
    http::{
        header::{InvalidHeaderValue, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Redirect},
    Json,
};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, warn};
use url::Url;

use super::auth::{
    session::{extract_cookie, extract_session_token, session_cookie},
    session_state::SessionState,
    state::{AuthState, OAuthConfig},
    storage::{delete_session, insert_session, link_provider_identity, ProviderIdentity},
    types::ErrorResponse,
    utils::{generate_state_token, hash_session_token, normalize_email, split_display_name},
};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

const STATE_COOKIE_NAME: &str = "signet_oauth_state";
const STATE_COOKIE_TTL_SECONDS: i64 = 10 * 60;

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
    email: Option<String>,
    name: Option<String>,
}

#[utoipa::path(
    get,
    path = "/auth/google",
    responses(
        (status = 303, description = "Redirect to the provider"),
        (status = 503, description = "OAuth not configured", body = ErrorResponse)
    ),
    tag = "oauth"
)]
pub async fn google_start(auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let Some(oauth) = auth_state.oauth() else {
        return oauth_disabled();
    };

    let state = match generate_state_token() {
        Ok(state) => state,
        Err(err) => {
            error!("Failed to generate OAuth state: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Internal server error")),
            )
                .into_response();
        }
    };

    let authorize_url = match build_authorize_url(oauth, &state) {
        Ok(url) => url,
        Err(err) => {
            error!("Failed to build authorize URL: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Internal server error")),
            )
                .into_response();
        }
    };

    let mut response_headers = HeaderMap::new();
    match state_cookie(&auth_state, &state) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("Failed to build state cookie: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Internal server error")),
            )
                .into_response();
        }
    }

    (response_headers, Redirect::to(&authorize_url)).into_response()
}

#[utoipa::path(
    get,
    path = "/auth/google/callback",
    responses(
        (status = 303, description = "Redirect to the app on success, or to the failure page"),
        (status = 503, description = "OAuth not configured", body = ErrorResponse)
    ),
    tag = "oauth"
)]
pub async fn google_callback(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    query: Query<CallbackQuery>,
) -> impl IntoResponse {
    let Some(oauth) = auth_state.oauth() else {
        return oauth_disabled();
    };

    if let Some(err) = &query.error {
        warn!("OAuth provider returned error: {err}");
        return failure_redirect(&auth_state);
    }

    let (Some(code), Some(state)) = (&query.code, &query.state) else {
        warn!("OAuth callback missing code or state");
        return failure_redirect(&auth_state);
    };

    // The state must round-trip through the cookie set at the start of the
    // flow; anything else is a forged or stale callback.
    let expected_state = extract_cookie(&headers, STATE_COOKIE_NAME);
    if expected_state.as_deref() != Some(state.as_str()) {
        warn!("OAuth state mismatch");
        return failure_redirect(&auth_state);
    }

    let userinfo = match fetch_userinfo(&auth_state, oauth, code).await {
        Ok(userinfo) => userinfo,
        Err(err) => {
            error!("OAuth exchange failed: {err}");
            return failure_redirect(&auth_state);
        }
    };

    let Some(identity) = identity_from_userinfo(userinfo) else {
        // The provider did not assert an email; there is nothing to link on.
        warn!("OAuth userinfo carried no email");
        return failure_redirect(&auth_state);
    };

    let linked = match link_provider_identity(&pool, &identity).await {
        Ok(linked) => linked,
        Err(err) => {
            error!("Failed to link provider identity: {err}");
            return failure_redirect(&auth_state);
        }
    };

    let session_secret = auth_state.config().session_secret();
    if let Some(old_token) = extract_session_token(&headers) {
        let old_hash = hash_session_token(session_secret, &old_token);
        if let Err(err) = delete_session(&pool, &old_hash).await {
            error!("Failed to delete superseded session: {err}");
        }
    }

    let next_state = if linked.twofa_enabled {
        SessionState::PendingSecondFactor(linked.user_id)
    } else {
        SessionState::Authenticated(linked.user_id)
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
            error!("Failed to create session after OAuth login: {err}");
            return failure_redirect(&auth_state);
        }
    };

    let mut response_headers = HeaderMap::new();
    match session_cookie(auth_state.config(), &token) {
        Ok(cookie) => {
            response_headers.append(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("Failed to build session cookie: {err}");
            return failure_redirect(&auth_state);
        }
    }
    if let Ok(cookie) = clear_state_cookie(&auth_state) {
        response_headers.append(SET_COOKIE, cookie);
    }

    let destination = page_url(auth_state.config().frontend_base_url(), "dashboard.html");
    (response_headers, Redirect::to(&destination)).into_response()
}

/// Exchange the authorization code and fetch OpenID userinfo.
async fn fetch_userinfo(
    auth_state: &AuthState,
    oauth: &OAuthConfig,
    code: &str,
) -> anyhow::Result<UserInfo> {
    let response = auth_state
        .http_client()
        .post(GOOGLE_TOKEN_URL)
        .form(&[
            ("code", code),
            ("client_id", oauth.client_id()),
            ("client_secret", oauth.client_secret()),
            ("redirect_uri", oauth.callback_url()),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(anyhow::anyhow!(
            "token exchange failed: {}",
            response.status()
        ));
    }
    let token: TokenResponse = response.json().await?;

    let response = auth_state
        .http_client()
        .get(GOOGLE_USERINFO_URL)
        .bearer_auth(&token.access_token)
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(anyhow::anyhow!(
            "userinfo fetch failed: {}",
            response.status()
        ));
    }
    Ok(response.json().await?)
}

/// Build a local identity from provider userinfo. Requires an email; the
/// display name splits on the first space, defaulting when absent.
fn identity_from_userinfo(userinfo: UserInfo) -> Option<ProviderIdentity> {
    let email = userinfo
        .email
        .as_deref()
        .map(normalize_email)
        .filter(|email| !email.is_empty())?;
    let display_name = userinfo
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or("Google User");
    let (first_name, last_name) = split_display_name(display_name);
    Some(ProviderIdentity {
        provider: "google",
        subject: userinfo.sub,
        email,
        first_name,
        last_name,
    })
}

fn build_authorize_url(oauth: &OAuthConfig, state: &str) -> anyhow::Result<String> {
    let mut url = Url::parse(GOOGLE_AUTH_URL)?;
    url.query_pairs_mut()
        .append_pair("client_id", oauth.client_id())
        .append_pair("redirect_uri", oauth.callback_url())
        .append_pair("response_type", "code")
        .append_pair("scope", "openid email profile")
        .append_pair("state", state);
    Ok(url.into())
}

fn state_cookie(auth_state: &AuthState, state: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{STATE_COOKIE_NAME}={state}; Path=/; HttpOnly; SameSite=Lax; Max-Age={STATE_COOKIE_TTL_SECONDS}"
    );
    if auth_state.config().session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn clear_state_cookie(auth_state: &AuthState) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{STATE_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if auth_state.config().session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn page_url(frontend_base_url: &str, page: &str) -> String {
    format!("{}/{page}", frontend_base_url.trim_end_matches('/'))
}

fn failure_redirect(auth_state: &AuthState) -> axum::response::Response {
    let destination = page_url(auth_state.config().frontend_base_url(), "index.html");
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_state_cookie(auth_state) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (response_headers, Redirect::to(&destination)).into_response()
}

fn oauth_disabled() -> axum::response::Response {
    warn!("OAuth route hit but no client credentials are configured");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse::new("OAuth is not configured.")),
    )
        .into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn oauth_config() -> OAuthConfig {
        OAuthConfig::new(
            "client-id".to_string(),
            SecretString::from("client-secret".to_string()),
            "http://localhost:3000/auth/google/callback".to_string(),
        )
    }

    #[test]
    fn authorize_url_carries_expected_parameters() {
        let url = build_authorize_url(&oauth_config(), "st4te").unwrap();
        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.host_str(), Some("accounts.google.com"));

        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("client_id".to_string(), "client-id".to_string())));
        assert!(pairs.contains(&("response_type".to_string(), "code".to_string())));
        assert!(pairs.contains(&("state".to_string(), "st4te".to_string())));
        assert!(pairs.contains(&("scope".to_string(), "openid email profile".to_string())));
    }

    #[test]
    fn identity_requires_email() {
        let userinfo = UserInfo {
            sub: "sub-1".to_string(),
            email: None,
            name: Some("Ada Lovelace".to_string()),
        };
        assert!(identity_from_userinfo(userinfo).is_none());
    }

    #[test]
    fn identity_splits_display_name() {
        let userinfo = UserInfo {
            sub: "sub-1".to_string(),
            email: Some(" Ada@Example.com ".to_string()),
            name: Some("Ada King Lovelace".to_string()),
        };
        let identity = identity_from_userinfo(userinfo).unwrap();
        assert_eq!(identity.email, "ada@example.com");
        assert_eq!(identity.first_name, "Ada");
        assert_eq!(identity.last_name.as_deref(), Some("King Lovelace"));
    }

    #[test]
    fn identity_defaults_missing_display_name() {
        let userinfo = UserInfo {
            sub: "sub-1".to_string(),
            email: Some("ada@example.com".to_string()),
            name: None,
        };
        let identity = identity_from_userinfo(userinfo).unwrap();
        assert_eq!(identity.first_name, "Google");
        assert_eq!(identity.last_name.as_deref(), Some("User"));
    }

    #[test]
    fn page_url_trims_trailing_slash() {
        assert_eq!(
            page_url("http://localhost:5173/", "dashboard.html"),
            "http://localhost:5173/dashboard.html"
        );
    }
}
