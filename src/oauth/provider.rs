use anyhow::{anyhow, Context};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Deserialize;
use tracing::debug;

use crate::config::OAuthConfig;
use crate::error::ApiError;

/// Profile normalized from the provider's user-info response. Field names
/// match the Google user-info payload; other providers are mapped through
/// the same shape.
#[derive(Debug, Clone, Deserialize)]
pub struct FederatedProfile {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub picture: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Opaque CSRF state for one authorization round trip: 16 bytes from the OS
/// entropy source, hex-encoded.
pub fn generate_state() -> Result<String, ApiError> {
    let mut buf = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| ApiError::Internal(anyhow!("entropy source failed: {e}")))?;
    Ok(hex::encode(buf))
}

/// Drives the authorization-code flow against the configured provider: builds
/// the redirect, exchanges the code server-to-server, fetches the profile.
#[derive(Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    config: OAuthConfig,
}

impl OAuthClient {
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn provider_name(&self) -> &str {
        &self.config.provider
    }

    /// Authorization-endpoint URL for a freshly issued state value.
    pub fn login_url(&self, state: &str) -> anyhow::Result<String> {
        let mut url =
            reqwest::Url::parse(&self.config.auth_url).context("authorize endpoint URL")?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_url)
            .append_pair("response_type", "code")
            .append_pair("scope", "email profile")
            .append_pair("state", state);
        Ok(url.to_string())
    }

    /// Exchange the authorization code and fetch the normalized profile.
    /// Two round trips: token endpoint, then user-info endpoint.
    pub async fn fetch_user(&self, code: &str) -> Result<FederatedProfile, ApiError> {
        let token = self.exchange_code(code).await?;

        let resp = self
            .http
            .get(&self.config.userinfo_url)
            .bearer_auth(&token.access_token)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ApiError::Provider(anyhow!(
                "userinfo endpoint returned {}",
                resp.status()
            )));
        }

        let profile = resp.json::<FederatedProfile>().await?;
        debug!(external_id = %profile.id, "federated profile fetched");
        Ok(profile)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, ApiError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", self.config.redirect_url.as_str()),
        ];
        let resp = self.http.post(&self.config.token_url).form(&params).send().await?;
        if !resp.status().is_success() {
            // A rejected grant is a client-visible 400, not a downstream outage.
            return Err(ApiError::Validation("Provider authorization failed".into()));
        }
        Ok(resp.json::<TokenResponse>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> OAuthConfig {
        OAuthConfig {
            provider: "google".into(),
            client_id: "client-123".into(),
            client_secret: "shh".into(),
            redirect_url: "http://localhost:8080/oauth/google/callback".into(),
            auth_url: "https://accounts.google.com/o/oauth2/auth".into(),
            token_url: "https://oauth2.googleapis.com/token".into(),
            userinfo_url: "https://www.googleapis.com/oauth2/v2/userinfo".into(),
        }
    }

    #[test]
    fn state_is_32_hex_chars_and_unique() {
        let a = generate_state().unwrap();
        let b = generate_state().unwrap();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn login_url_carries_flow_parameters() {
        let client = OAuthClient::new(test_config());
        let url = client.login_url("deadbeef").unwrap();
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/auth?"));
        assert!(url.contains("client_id=client-123"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("scope=email+profile"));
        assert!(url.contains("state=deadbeef"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8080%2Foauth%2Fgoogle%2Fcallback"));
    }

    #[test]
    fn profile_normalizes_google_payload() {
        let json = r#"{
            "id": "1093098213",
            "email": "ann@gmail.com",
            "verified_email": true,
            "name": "Ann Example",
            "picture": "https://lh3.googleusercontent.com/a/photo"
        }"#;
        let profile: FederatedProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.id, "1093098213");
        assert_eq!(profile.email, "ann@gmail.com");
        assert_eq!(profile.name, "Ann Example");
        assert!(profile.picture.is_some());
    }

    #[test]
    fn profile_tolerates_missing_optional_fields() {
        let json = r#"{ "id": "42", "email": "bare@x.com" }"#;
        let profile: FederatedProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.name, "");
        assert!(profile.picture.is_none());
    }
}
