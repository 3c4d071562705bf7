use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub ttl_days: i64,
}

/// Endpoints and credentials for the single configured identity provider.
/// Endpoint defaults are Google's; override them to point at another provider
/// (or a stub during tests).
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub provider: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub oauth: OAuthConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                let host = std::env::var("DB_HOST").unwrap_or_else(|_| "localhost".into());
                let port = std::env::var("DB_PORT").unwrap_or_else(|_| "5432".into());
                let user = std::env::var("DB_USER").unwrap_or_default();
                let password = std::env::var("DB_PASSWORD").unwrap_or_default();
                let dbname = std::env::var("DB_NAME").unwrap_or_default();
                format!("postgres://{user}:{password}@{host}:{port}/{dbname}")
            }
        };

        // An absent signing key must fail startup, never fall back to "".
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            ttl_days: std::env::var("TOKEN_TTL_DAYS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(7),
        };

        let oauth = OAuthConfig {
            provider: std::env::var("OAUTH_PROVIDER").unwrap_or_else(|_| "google".into()),
            client_id: std::env::var("OAUTH_CLIENT_ID").unwrap_or_default(),
            client_secret: std::env::var("OAUTH_CLIENT_SECRET").unwrap_or_default(),
            redirect_url: std::env::var("OAUTH_REDIRECT_URL").unwrap_or_default(),
            auth_url: std::env::var("OAUTH_AUTH_URL")
                .unwrap_or_else(|_| "https://accounts.google.com/o/oauth2/auth".into()),
            token_url: std::env::var("OAUTH_TOKEN_URL")
                .unwrap_or_else(|_| "https://oauth2.googleapis.com/token".into()),
            userinfo_url: std::env::var("OAUTH_USERINFO_URL")
                .unwrap_or_else(|_| "https://www.googleapis.com/oauth2/v2/userinfo".into()),
        };

        Ok(Self {
            database_url,
            jwt,
            oauth,
        })
    }
}
