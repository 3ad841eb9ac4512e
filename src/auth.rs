//! API token authentication at the HTTP boundary
//!
//! Session establishment (OAuth, cookies) lives in the fronting layer;
//! the service itself accepts opaque bearer tokens with a fixed prefix
//! resolved against the token table.

use crate::error::Result;
use chrono::Utc;
use sqlx::{sqlite::SqlitePool, Row};
use tracing::debug;
use uuid::Uuid;

/// Prefix carried by every issued API token
pub const TOKEN_PREFIX: &str = "autoform_";

/// Authenticated principal
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub personal_instructions: Option<String>,
}

/// Token-table authentication
#[derive(Clone)]
pub struct AuthService {
    pool: SqlitePool,
}

impl AuthService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Resolve a bearer token to its user, or None for unknown tokens
    pub async fn resolve_bearer(&self, token: &str) -> Result<Option<AuthUser>> {
        if !token.starts_with(TOKEN_PREFIX) {
            return Ok(None);
        }

        let row = sqlx::query(
            "SELECT u.id AS user_id, u.personal_instructions
             FROM api_tokens t JOIN users u ON u.id = t.user_id
             WHERE t.token = ?1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| AuthUser {
            id: row.get("user_id"),
            personal_instructions: row.get("personal_instructions"),
        }))
    }

    /// Create a user row if absent
    pub async fn ensure_user(&self, user_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO users (id, created_at) VALUES (?1, ?2)")
            .bind(user_id)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Issue a new token for a user
    pub async fn issue_token(&self, user_id: &str, label: Option<&str>) -> Result<String> {
        let token = format!("{}{}", TOKEN_PREFIX, Uuid::new_v4().simple());

        sqlx::query(
            "INSERT INTO api_tokens (token, user_id, label, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&token)
        .bind(user_id)
        .bind(label)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!("Issued token for user {}", user_id);
        Ok(token)
    }

    /// Revoke a token; returns false when it did not exist
    pub async fn revoke_token(&self, token: &str, user_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM api_tokens WHERE token = ?1 AND user_id = ?2")
            .bind(token)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
