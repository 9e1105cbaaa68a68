//! Database helpers for users, recovery codes, and sessions.

use anyhow::{anyhow, Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::session_state::SessionState;
use super::utils::{generate_session_token, hash_session_token, is_unique_violation};

/// Outcome when attempting to create a new user.
#[derive(Debug)]
pub(super) enum SignupOutcome {
    Created(UserSummary),
    Conflict,
}

#[derive(Debug)]
pub(crate) struct UserSummary {
    pub(crate) id: Uuid,
    pub(crate) first_name: String,
    pub(crate) last_name: Option<String>,
    pub(crate) email: String,
}

pub(super) struct NewUser<'a> {
    pub(super) first_name: &'a str,
    pub(super) last_name: Option<&'a str>,
    pub(super) email: &'a str,
    pub(super) phone_encrypted: Option<&'a str>,
    pub(super) password_hash: &'a str,
}

/// Minimal fields needed to evaluate a credential login.
pub(super) struct LoginRecord {
    pub(super) user_id: Uuid,
    pub(super) password_hash: Option<String>,
    pub(super) twofa_enabled: bool,
}

pub(crate) struct ProfileRecord {
    pub(crate) id: Uuid,
    pub(crate) first_name: String,
    pub(crate) last_name: Option<String>,
    pub(crate) email: String,
    pub(crate) phone: Option<String>,
    pub(crate) twofa_enabled: bool,
}

pub(crate) struct TwofaRecord {
    pub(crate) email: String,
    pub(crate) twofa_enabled: bool,
    pub(crate) twofa_secret: Option<String>,
}

/// Identity asserted by an OAuth provider after token exchange.
#[derive(Debug)]
pub(crate) struct ProviderIdentity {
    pub(crate) provider: &'static str,
    pub(crate) subject: String,
    pub(crate) email: String,
    pub(crate) first_name: String,
    pub(crate) last_name: Option<String>,
}

#[derive(Debug)]
pub(crate) struct LinkedUser {
    pub(crate) user_id: Uuid,
    pub(crate) twofa_enabled: bool,
}

/// Data attached to a live session row.
pub(crate) struct SessionRow {
    pub(crate) state: SessionState,
    pub(crate) enroll_secret: Option<String>,
}

/// Insert a new user. The unique index on email decides signup conflicts;
/// there is deliberately no lookup-then-insert window.
pub(super) async fn insert_user(pool: &PgPool, user: NewUser<'_>) -> Result<SignupOutcome> {
    let query = r"
        INSERT INTO users (first_name, last_name, email, phone, password_hash)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, first_name, last_name, email
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user.first_name)
        .bind(user.last_name)
        .bind(user.email)
        .bind(user.phone_encrypted)
        .bind(user.password_hash)
        .fetch_one(pool)
        .instrument(span)
        .await;

    match row {
        Ok(row) => Ok(SignupOutcome::Created(UserSummary {
            id: row.get("id"),
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            email: row.get("email"),
        })),
        Err(err) if is_unique_violation(&err) => Ok(SignupOutcome::Conflict),
        Err(err) => Err(err).context("failed to insert user"),
    }
}

/// Look up credential-login data by normalized email.
pub(super) async fn find_login_user(pool: &PgPool, email: &str) -> Result<Option<LoginRecord>> {
    let query = "SELECT id, password_hash, twofa_enabled FROM users WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup login user")?;

    Ok(row.map(|row| LoginRecord {
        user_id: row.get("id"),
        password_hash: row.get("password_hash"),
        twofa_enabled: row.get("twofa_enabled"),
    }))
}

pub(crate) async fn fetch_profile(pool: &PgPool, user_id: Uuid) -> Result<Option<ProfileRecord>> {
    let query = r"
        SELECT id, first_name, last_name, email, phone, twofa_enabled
        FROM users
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch profile")?;

    Ok(row.map(|row| ProfileRecord {
        id: row.get("id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        email: row.get("email"),
        phone: row.get("phone"),
        twofa_enabled: row.get("twofa_enabled"),
    }))
}

pub(crate) async fn fetch_twofa_user(pool: &PgPool, user_id: Uuid) -> Result<Option<TwofaRecord>> {
    let query = "SELECT email, twofa_enabled, twofa_secret FROM users WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch 2FA user")?;

    Ok(row.map(|row| TwofaRecord {
        email: row.get("email"),
        twofa_enabled: row.get("twofa_enabled"),
        twofa_secret: row.get("twofa_secret"),
    }))
}

/// Create-or-link for a provider identity, keyed by email.
///
/// An existing account gets the provider linkage recorded; password, phone,
/// and 2FA settings are never touched. A new account is created without a
/// password hash.
pub(crate) async fn link_provider_identity(
    pool: &PgPool,
    identity: &ProviderIdentity,
) -> Result<LinkedUser> {
    let query = "SELECT id, twofa_enabled FROM users WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let existing = sqlx::query(query)
        .bind(&identity.email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user for provider linking")?;

    if let Some(row) = existing {
        let user_id: Uuid = row.get("id");
        let twofa_enabled: bool = row.get("twofa_enabled");

        let query = r"
            UPDATE users
            SET oauth_subject = $2,
                oauth_provider = $3,
                updated_at = NOW()
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(&identity.subject)
            .bind(identity.provider)
            .execute(pool)
            .instrument(span)
            .await
            .context("failed to link provider identity")?;

        return Ok(LinkedUser {
            user_id,
            twofa_enabled,
        });
    }

    let query = r"
        INSERT INTO users (first_name, last_name, email, oauth_subject, oauth_provider)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(&identity.first_name)
        .bind(&identity.last_name)
        .bind(&identity.email)
        .bind(&identity.subject)
        .bind(identity.provider)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to create user from provider identity")?;

    Ok(LinkedUser {
        user_id: row.get("id"),
        twofa_enabled: false,
    })
}

/// Commit a verified enrollment in one transaction: persist the TOTP secret,
/// flip the enablement flag, and store the hashed recovery codes. A failure
/// anywhere rolls the whole commit back, so 2FA is never enabled without its
/// recovery codes.
pub(crate) async fn commit_totp_enrollment(
    pool: &PgPool,
    user_id: Uuid,
    encrypted_secret: &str,
    code_hashes: &[String],
) -> Result<()> {
    let mut tx = pool.begin().await.context("begin enrollment commit")?;

    let query = r"
        UPDATE users
        SET twofa_secret = $2,
            twofa_enabled = TRUE,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(encrypted_secret)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to enable TOTP")?;

    let query = "INSERT INTO recovery_codes (user_id, code_hash) VALUES ($1, $2)";
    for code_hash in code_hashes {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(code_hash)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert recovery code")?;
    }

    tx.commit().await.context("commit enrollment")?;
    Ok(())
}

/// Create a session row for `state` and return the raw token for the cookie.
/// Only the keyed hash is stored.
pub(crate) async fn insert_session(
    pool: &PgPool,
    session_secret: &str,
    state: SessionState,
    enroll_secret: Option<&str>,
    ttl_seconds: i64,
) -> Result<String> {
    let kind = state
        .kind()
        .ok_or_else(|| anyhow!("cannot persist an anonymous session"))?;
    let user_id = state
        .user_id()
        .ok_or_else(|| anyhow!("cannot persist a session without a user"))?;

    let query = r"
        INSERT INTO sessions (token_hash, state, user_id, enroll_secret, expires_at)
        VALUES ($1, $2, $3, $4, NOW() + ($5 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let token = generate_session_token()?;
        let token_hash = hash_session_token(session_secret, &token);
        let result = sqlx::query(query)
            .bind(token_hash)
            .bind(kind)
            .bind(user_id)
            .bind(enroll_secret)
            .bind(ttl_seconds)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert session"),
        }
    }

    Err(anyhow!("failed to generate unique session token"))
}

pub(crate) async fn lookup_session(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<Option<SessionRow>> {
    let query = r"
        SELECT user_id, state, enroll_secret
        FROM sessions
        WHERE token_hash = $1
          AND expires_at > NOW()
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session")?;

    Ok(row.and_then(|row| {
        let kind: String = row.get("state");
        let user_id: Uuid = row.get("user_id");
        SessionState::from_row(&kind, user_id).map(|state| SessionRow {
            state,
            enroll_secret: row.get("enroll_secret"),
        })
    }))
}

/// Promote a session to a new state in a single statement: the token is
/// rotated, the TTL restarts, and any transient enrollment secret is
/// cleared. Returns the fresh raw token, or `None` when the old session no
/// longer exists.
pub(crate) async fn rotate_session(
    pool: &PgPool,
    session_secret: &str,
    old_token_hash: &[u8],
    new_state: SessionState,
    ttl_seconds: i64,
) -> Result<Option<String>> {
    let kind = new_state
        .kind()
        .ok_or_else(|| anyhow!("cannot rotate into an anonymous session"))?;

    let token = generate_session_token()?;
    let token_hash = hash_session_token(session_secret, &token);

    let query = r"
        UPDATE sessions
        SET token_hash = $2,
            state = $3,
            enroll_secret = NULL,
            expires_at = NOW() + ($4 * INTERVAL '1 second')
        WHERE token_hash = $1
        RETURNING user_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(old_token_hash)
        .bind(token_hash)
        .bind(kind)
        .bind(ttl_seconds)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to rotate session")?;

    Ok(row.map(|_| token))
}

/// Stash or clear the transient enrollment secret on a session row.
pub(crate) async fn set_enroll_secret(
    pool: &PgPool,
    token_hash: &[u8],
    enroll_secret: Option<&str>,
) -> Result<()> {
    let query = "UPDATE sessions SET enroll_secret = $2 WHERE token_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .bind(enroll_secret)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update enrollment secret")?;
    Ok(())
}

pub(crate) async fn delete_session(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    // Logout is idempotent; it's fine if no rows are deleted.
    let query = "DELETE FROM sessions WHERE token_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete session")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signup_outcome_debug_names() {
        let created = SignupOutcome::Created(UserSummary {
            id: Uuid::nil(),
            first_name: "Ada".to_string(),
            last_name: None,
            email: "ada@example.com".to_string(),
        });
        assert!(format!("{created:?}").starts_with("Created"));
        assert_eq!(format!("{:?}", SignupOutcome::Conflict), "Conflict");
    }

    #[test]
    fn provider_identity_holds_values() {
        let identity = ProviderIdentity {
            provider: "google",
            subject: "sub-123".to_string(),
            email: "ada@example.com".to_string(),
            first_name: "Ada".to_string(),
            last_name: Some("Lovelace".to_string()),
        };
        assert_eq!(identity.provider, "google");
        assert_eq!(identity.subject, "sub-123");
        assert_eq!(identity.last_name.as_deref(), Some("Lovelace"));
    }

    #[test]
    fn linked_user_holds_values() {
        let linked = LinkedUser {
            user_id: Uuid::nil(),
            twofa_enabled: true,
        };
        assert_eq!(linked.user_id, Uuid::nil());
        assert!(linked.twofa_enabled);
    }
}
