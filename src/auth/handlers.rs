use axum::{
    extract::{FromRef, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, RegisterRequest, UpdateMeRequest, UserResponse},
        extractors::AuthUser,
        jwt::JwtKeys,
        password,
    },
    error::ApiError,
    state::AppState,
    users::repo::NewUser,
    users::model::User,
};

const MIN_PASSWORD_LEN: usize = 6;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me).put(update_me).delete(delete_me))
        .route("/users/:id", get(get_user))
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(ApiError::Validation("Invalid email".into()));
    }
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("Name required".into()));
    }
    if payload.password.len() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(ApiError::Validation("Password too short".into()));
    }

    let hash = password::hash_password(&payload.password).map_err(ApiError::Hashing)?;

    let user = User::create(
        &state.db,
        NewUser {
            name,
            email: &payload.email,
            password_hash: Some(&hash),
            provider: None,
            provider_id: None,
            picture_url: None,
        },
    )
    .await?;

    let keys = JwtKeys::from_ref(&state);
    let token = keys.issue(user.id)?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: user.into(),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(ApiError::Validation("Invalid email".into()));
    }

    // Unknown email, federated-only account and wrong password collapse into
    // one undifferentiated failure, and every path pays for one argon2
    // verification.
    let user = match User::find_by_email(&state.db, &payload.email).await? {
        Some(u) => u,
        None => {
            password::verify_dummy(&payload.password);
            warn!(email = %payload.email, "login failed");
            return Err(ApiError::InvalidCredentials);
        }
    };
    let Some(hash) = user.password_hash.as_deref() else {
        password::verify_dummy(&payload.password);
        warn!(user_id = %user.id, "login failed");
        return Err(ApiError::InvalidCredentials);
    };
    if !password::verify_password(&payload.password, hash) {
        warn!(user_id = %user.id, "login failed");
        return Err(ApiError::InvalidCredentials);
    }

    let keys = JwtKeys::from_ref(&state);
    let token = keys.issue(user.id)?;

    info!(user_id = %user.id, "user logged in");
    Ok(Json(AuthResponse {
        token,
        user: user.into(),
    }))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<UserResponse>, ApiError> {
    let user = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(UserResponse { user: user.into() }))
}

#[instrument(skip(state, payload))]
pub async fn update_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<UpdateMeRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let mut user = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    if let Some(name) = payload.name.as_deref() {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::Validation("Name must not be empty".into()));
        }
        user.name = name.to_string();
    }
    if let Some(pw) = payload.password.as_deref() {
        if pw.len() < MIN_PASSWORD_LEN {
            return Err(ApiError::Validation("Password too short".into()));
        }
        user.password_hash = Some(password::hash_password(pw).map_err(ApiError::Hashing)?);
    }

    let user = User::update(&state.db, &user)
        .await?
        .ok_or(ApiError::NotFound)?;

    info!(user_id = %user.id, "profile updated");
    Ok(Json(UserResponse { user: user.into() }))
}

#[instrument(skip(state))]
pub async fn delete_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<StatusCode, ApiError> {
    if !User::soft_delete(&state.db, user_id).await? {
        return Err(ApiError::NotFound);
    }
    info!(user_id = %user_id, "account deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /users/:id, for service-to-service lookups. Requires a valid bearer
/// token like the /me routes.
#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = User::find_by_id(&state.db, id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(UserResponse { user: user.into() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation_matrix() {
        assert!(is_valid_email("ann@x.com"));
        assert!(is_valid_email("first.last@sub.domain.org"));
        assert!(!is_valid_email("ann"));
        assert!(!is_valid_email("ann@"));
        assert!(!is_valid_email("@x.com"));
        assert!(!is_valid_email("ann@x"));
        assert!(!is_valid_email("ann @x.com"));
        assert!(!is_valid_email(""));
    }
}
