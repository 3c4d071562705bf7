use axum::{
    extract::{FromRef, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::{
    auth::{dto::AuthResponse, jwt::JwtKeys},
    error::ApiError,
    oauth::provider::{generate_state, FederatedProfile},
    state::AppState,
    users::model::User,
    users::repo::NewUser,
};

const STATE_COOKIE: &str = "oauth_state";
const STATE_TTL_MINUTES: i64 = 5;

pub fn oauth_routes() -> Router<AppState> {
    Router::new()
        .route("/oauth/:provider/login", get(oauth_login))
        .route("/oauth/:provider/callback", get(oauth_callback))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

/// The callback state must exactly match the value this session's login
/// redirect issued; a valid-looking state from any other flow is a mismatch.
fn state_matches(stored: Option<&str>, presented: &str) -> bool {
    stored.map(|s| s == presented).unwrap_or(false)
}

#[instrument(skip(state, jar))]
pub async fn oauth_login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    if provider != state.oauth.provider_name() {
        return Err(ApiError::NotFound);
    }

    let flow_state = generate_state()?;
    let url = state.oauth.login_url(&flow_state)?;

    let cookie = Cookie::build((STATE_COOKIE, flow_state))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::minutes(STATE_TTL_MINUTES))
        .build();

    Ok((jar.add(cookie), (StatusCode::FOUND, [(header::LOCATION, url)])))
}

#[instrument(skip(state, query, jar))]
pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<AuthResponse>), ApiError> {
    if provider != state.oauth.provider_name() {
        return Err(ApiError::NotFound);
    }

    let (Some(code), Some(flow_state)) = (query.code.as_deref(), query.state.as_deref()) else {
        return Err(ApiError::Validation("Missing code or state".into()));
    };

    let stored = jar.get(STATE_COOKIE).map(|c| c.value().to_string());
    if !state_matches(stored.as_deref(), flow_state) {
        warn!("oauth state mismatch");
        return Err(ApiError::StateMismatch);
    }
    // One round trip per state value.
    let jar = jar.remove(Cookie::build((STATE_COOKIE, "")).path("/").build());

    let profile = state.oauth.fetch_user(code).await?;
    let user = find_or_create(&state, &profile).await?;

    let keys = JwtKeys::from_ref(&state);
    let token = keys.issue(user.id)?;

    info!(user_id = %user.id, provider = %provider, "federated login");
    Ok((
        jar,
        Json(AuthResponse {
            token,
            user: user.into(),
        }),
    ))
}

/// Find-or-create keyed by the provider identity. Two simultaneous first
/// logins for the same identity race on the unique constraint; the loser
/// retries the lookup instead of failing the request.
async fn find_or_create(state: &AppState, profile: &FederatedProfile) -> Result<User, ApiError> {
    let provider = state.oauth.provider_name();

    if let Some(user) = User::find_by_provider_identity(&state.db, provider, &profile.id).await? {
        return Ok(user);
    }

    let email = profile.email.trim().to_lowercase();
    let created = User::create(
        &state.db,
        NewUser {
            name: &profile.name,
            email: &email,
            password_hash: None,
            provider: Some(provider),
            provider_id: Some(&profile.id),
            picture_url: profile.picture.as_deref(),
        },
    )
    .await;

    match created {
        Ok(user) => Ok(user),
        Err(ApiError::DuplicateIdentity) => {
            User::find_by_provider_identity(&state.db, provider, &profile.id)
                .await?
                .ok_or(ApiError::NotFound)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_must_match_exactly() {
        assert!(state_matches(Some("abc123"), "abc123"));
        assert!(!state_matches(Some("abc123"), "abc124"));
        assert!(!state_matches(Some("abc123"), "ABC123"));
        assert!(!state_matches(Some(""), "abc123"));
    }

    #[test]
    fn missing_cookie_never_matches() {
        // Any presented state fails without a stored value, however plausible.
        assert!(!state_matches(None, "0123456789abcdef0123456789abcdef"));
        assert!(!state_matches(None, ""));
    }
}
