use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::users::model::User;

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Body for PUT /me; both fields optional, absent means unchanged.
#[derive(Debug, Deserialize)]
pub struct UpdateMeRequest {
    pub name: Option<String>,
    pub password: Option<String>,
}

/// Response returned after register, login or a federated callback.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: PublicUser,
    pub token: String,
}

/// Envelope for endpoints that return a bare user.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: PublicUser,
}

/// Public part of the user returned to the client. Credential digests never
/// appear here.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            picture_url: user.picture_url,
            created_at: user.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn sample_user() -> User {
        User {
            id: Uuid::new_v4(),
            name: "Ann".into(),
            email: "ann@x.com".into(),
            password_hash: Some("$argon2id$not-a-real-digest".into()),
            provider: None,
            provider_id: None,
            picture_url: None,
            created_at: datetime!(2024-01-01 00:00:00 UTC),
            updated_at: datetime!(2024-01-01 00:00:00 UTC),
            deleted_at: None,
        }
    }

    #[test]
    fn public_user_never_serializes_credentials() {
        let public: PublicUser = sample_user().into();
        let json = serde_json::to_string(&public).unwrap();
        assert!(json.contains("ann@x.com"));
        assert!(json.contains("Ann"));
        assert!(!json.contains("password"));
        assert!(!json.contains("argon2"));
    }

    #[test]
    fn absent_picture_is_omitted() {
        let public: PublicUser = sample_user().into();
        let json = serde_json::to_string(&public).unwrap();
        assert!(!json.contains("picture_url"));
    }

    #[test]
    fn user_response_wraps_in_user_key() {
        let response = UserResponse {
            user: sample_user().into(),
        };
        let value: serde_json::Value = serde_json::to_value(&response).unwrap();
        assert!(value.get("user").is_some());
        assert_eq!(value["user"]["email"], "ann@x.com");
    }
}
