use crate::{
    api,
    api::handlers::auth::state::{AuthConfig, OAuthConfig},
    cli::actions::Action,
};
use anyhow::Result;
use tracing::warn;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server {
            port,
            dsn,
            session_secret,
            encryption_key,
            production,
            frontend_base_url,
            issuer,
            session_ttl_seconds,
            oauth_client_id,
            oauth_client_secret,
            oauth_callback_url,
        } => {
            let auth_config = AuthConfig::new(frontend_base_url, session_secret)
                .with_session_ttl_seconds(session_ttl_seconds)
                .with_production(production)
                .with_issuer(issuer);

            let oauth_config = match (oauth_client_id, oauth_client_secret, oauth_callback_url) {
                (Some(client_id), Some(client_secret), Some(callback_url)) => {
                    Some(OAuthConfig::new(client_id, client_secret, callback_url))
                }
                (None, None, None) => None,
                _ => {
                    // Partial credentials are treated as none rather than a
                    // broken half-configured provider.
                    warn!("Incomplete OAuth configuration, Google login disabled");
                    None
                }
            };

            api::new(port, dsn, auth_config, encryption_key, oauth_config).await?;
        }
    }

    Ok(())
}
