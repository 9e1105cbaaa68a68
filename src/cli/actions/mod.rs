use crate::crypto::EncryptionKey;
use secrecy::SecretString;

pub mod server;

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: String,
        session_secret: SecretString,
        encryption_key: EncryptionKey,
        production: bool,
        frontend_base_url: String,
        issuer: String,
        session_ttl_seconds: i64,
        oauth_client_id: Option<String>,
        oauth_client_secret: Option<SecretString>,
        oauth_callback_url: Option<String>,
    },
}
