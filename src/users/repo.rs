use sqlx::PgPool;
use uuid::Uuid;

use crate::error::ApiError;
use crate::users::model::User;

/// Partial unique indexes scoped to live rows; the constraint names are how
/// insert races get told apart from other storage failures.
const EMAIL_UNIQUE_IDX: &str = "users_email_live_idx";
const PROVIDER_UNIQUE_IDX: &str = "users_provider_identity_live_idx";

/// Fields supplied at creation; everything else is generated by the database.
#[derive(Debug)]
pub struct NewUser<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password_hash: Option<&'a str>,
    pub provider: Option<&'a str>,
    pub provider_id: Option<&'a str>,
    pub picture_url: Option<&'a str>,
}

fn map_unique_violation(err: sqlx::Error) -> ApiError {
    if let sqlx::Error::Database(ref db_err) = err {
        match db_err.constraint() {
            Some(EMAIL_UNIQUE_IDX) => return ApiError::DuplicateEmail,
            Some(PROVIDER_UNIQUE_IDX) => return ApiError::DuplicateIdentity,
            _ => {}
        }
    }
    ApiError::Storage(err)
}

impl User {
    /// Insert a new user. Uniqueness is enforced by the storage constraints,
    /// not by a prior lookup, so concurrent creations race safely.
    pub async fn create(db: &PgPool, new: NewUser<'_>) -> Result<User, ApiError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, email, password_hash, provider, provider_id, picture_url)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, name, email, password_hash, provider, provider_id,
                      picture_url, created_at, updated_at, deleted_at
            "#,
        )
        .bind(new.name)
        .bind(new.email)
        .bind(new.password_hash)
        .bind(new.provider)
        .bind(new.provider_id)
        .bind(new.picture_url)
        .fetch_one(db)
        .await
        .map_err(map_unique_violation)
    }

    /// Full-row rewrite of the mutable fields; last writer wins. Returns None
    /// when the row is gone or soft-deleted.
    pub async fn update(db: &PgPool, user: &User) -> Result<Option<User>, ApiError> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET name = $2, email = $3, password_hash = $4, provider = $5,
                provider_id = $6, picture_url = $7, updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING id, name, email, password_hash, provider, provider_id,
                      picture_url, created_at, updated_at, deleted_at
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.provider)
        .bind(&user.provider_id)
        .bind(&user.picture_url)
        .fetch_optional(db)
        .await
        .map_err(map_unique_violation)
    }

    /// Mark the row deleted. Lookups skip it from here on; the row itself is
    /// kept. Returns false when there was no live row to delete.
    pub async fn soft_delete(db: &PgPool, id: Uuid) -> Result<bool, ApiError> {
        let result = sqlx::query(
            r#"
            UPDATE users SET deleted_at = now(), updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> Result<Option<User>, ApiError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, provider, provider_id,
                   picture_url, created_at, updated_at, deleted_at
            FROM users
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_email(db: &PgPool, email: &str) -> Result<Option<User>, ApiError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, provider, provider_id,
                   picture_url, created_at, updated_at, deleted_at
            FROM users
            WHERE email = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_provider_identity(
        db: &PgPool,
        provider: &str,
        provider_id: &str,
    ) -> Result<Option<User>, ApiError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, provider, provider_id,
                   picture_url, created_at, updated_at, deleted_at
            FROM users
            WHERE provider = $1 AND provider_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(provider)
        .bind(provider_id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }
}
