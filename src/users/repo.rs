use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// Access tier used by `restrict_to`. Forbidden by default: a role grants
/// nothing unless a route lists it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Standard,
    Guide,
    LeadGuide,
    Admin,
}

/// Credential store record. Password hash and reset-token fields never
/// appear in serialized output.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub photo: String,
    pub role: Role,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    #[serde(skip_serializing, default)]
    pub password_changed_at: Option<OffsetDateTime>,
    #[serde(skip_serializing, default)]
    pub password_reset_token: Option<Vec<u8>>,
    #[serde(skip_serializing, default)]
    pub password_reset_expires: Option<OffsetDateTime>,
    #[serde(skip_serializing, default)]
    pub active: bool,
    pub created_at: OffsetDateTime,
}

const USER_COLUMNS: &str = "id, name, email, photo, role, password_hash, \
     password_changed_at, password_reset_token, password_reset_expires, active, created_at";

impl User {
    /// True when the password was changed after a token issued at `iat`
    /// (unix seconds) — such tokens are stale and must be rejected.
    pub fn changed_password_after(&self, iat: i64) -> bool {
        match self.password_changed_at {
            Some(changed) => iat < changed.unix_timestamp(),
            None => false,
        }
    }

    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND active"
        ))
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND active"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Match a presented reset-token digest. Expiry and consumption are
    /// checked by [`User::redeems_reset_token`] on the loaded row.
    pub async fn find_by_reset_digest(db: &PgPool, digest: &[u8]) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE password_reset_token = $1 AND active"
        ))
        .bind(digest)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// True while the stored reset state redeems the presented secret.
    pub fn redeems_reset_token(&self, presented: &str, now: OffsetDateTime) -> bool {
        crate::auth::reset::token_redeemable(
            self.password_reset_token.as_deref(),
            self.password_reset_expires,
            presented,
            now,
        )
    }

    pub async fn create(
        db: &PgPool,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> sqlx::Result<User> {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (name, email, password_hash) \
             VALUES ($1, $2, $3) RETURNING {USER_COLUMNS}"
        ))
        .bind(name)
        .bind(email)
        .bind(password_hash)
        .fetch_one(db)
        .await
    }

    /// Targeted write of the two reset columns only — profile validation
    /// does not apply to this transient state.
    pub async fn set_reset_token(
        db: &PgPool,
        id: Uuid,
        digest: &[u8],
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users SET password_reset_token = $2, password_reset_expires = $3 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(digest)
        .bind(expires_at)
        .execute(db)
        .await?;
        Ok(())
    }

    pub async fn clear_reset_token(db: &PgPool, id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users SET password_reset_token = NULL, password_reset_expires = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Re-hash write path: stores the new hash, stamps the change a second
    /// in the past so tokens issued in the same second stay valid, and
    /// consumes any outstanding reset token.
    pub async fn update_password(db: &PgPool, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        let changed_at = OffsetDateTime::now_utc() - Duration::seconds(1);
        sqlx::query(
            "UPDATE users SET password_hash = $2, password_changed_at = $3, \
             password_reset_token = NULL, password_reset_expires = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash)
        .bind(changed_at)
        .execute(db)
        .await?;
        Ok(())
    }

    pub async fn update_profile(
        db: &PgPool,
        id: Uuid,
        name: Option<&str>,
        email: Option<&str>,
        photo: Option<&str>,
    ) -> sqlx::Result<User> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET name = COALESCE($2, name), email = COALESCE($3, email), \
             photo = COALESCE($4, photo) \
             WHERE id = $1 AND active RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(name)
        .bind(email)
        .bind(photo)
        .fetch_one(db)
        .await
    }

    /// Soft delete: the row stays, every read path stops seeing it.
    pub async fn deactivate(db: &PgPool, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET active = FALSE WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }
}

/// Admin-facing update; passwords never travel through this path.
#[derive(Debug, Deserialize)]
pub struct AdminUpdateUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub active: Option<bool>,
}

#[axum::async_trait]
impl crate::crud::CrudResource for User {
    const TABLE: &'static str = "users";
    const FILTERABLE: &'static [crate::crud::FilterColumn] = &[
        ("name", crate::crud::ColumnKind::Text),
        ("email", crate::crud::ColumnKind::Text),
        ("role", crate::crud::ColumnKind::Text),
    ];
    const SORTABLE: &'static [&'static str] = &["name", "email", "role", "created_at"];
    const READ_GUARD: Option<&'static str> = Some("active");

    type Create = serde_json::Value;
    type Update = AdminUpdateUser;

    async fn insert(_db: &PgPool, _input: Self::Create) -> ApiResult<Self> {
        Err(ApiError::validation(
            "This route is not defined! Please use /signup instead",
        ))
    }

    async fn apply_update(db: &PgPool, id: Uuid, input: Self::Update) -> ApiResult<Self> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET name = COALESCE($2, name), email = COALESCE($3, email), \
             role = COALESCE($4, role), active = COALESCE($5, active) \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(input.name)
        .bind(input.email.map(|e| e.trim().to_lowercase()))
        .bind(input.role)
        .bind(input.active)
        .fetch_one(db)
        .await?;
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_changed_at(changed: Option<OffsetDateTime>) -> User {
        User {
            id: Uuid::new_v4(),
            name: "Test User".into(),
            email: "test@example.com".into(),
            photo: "default.jpg".into(),
            role: Role::Standard,
            password_hash: "hash".into(),
            password_changed_at: changed,
            password_reset_token: None,
            password_reset_expires: None,
            active: true,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn token_issued_before_change_is_stale() {
        let changed = OffsetDateTime::now_utc();
        let user = user_changed_at(Some(changed));
        assert!(user.changed_password_after(changed.unix_timestamp() - 60));
    }

    #[test]
    fn token_issued_after_change_is_fresh() {
        let changed = OffsetDateTime::now_utc();
        let user = user_changed_at(Some(changed));
        assert!(!user.changed_password_after(changed.unix_timestamp() + 60));
    }

    #[test]
    fn never_changed_password_is_never_stale() {
        let user = user_changed_at(None);
        assert!(!user.changed_password_after(0));
    }

    #[test]
    fn consumed_reset_state_no_longer_redeems() {
        let token = crate::auth::reset::generate_reset_token();
        let mut user = user_changed_at(None);
        user.password_reset_token = Some(token.digest.clone());
        user.password_reset_expires = Some(token.expires_at);
        let now = OffsetDateTime::now_utc();
        assert!(user.redeems_reset_token(&token.raw, now));

        // The update_password transition: columns cleared, change stamped.
        user.password_reset_token = None;
        user.password_reset_expires = None;
        user.password_changed_at = Some(now - Duration::seconds(1));
        assert!(!user.redeems_reset_token(&token.raw, now));
    }

    #[test]
    fn sensitive_fields_are_not_serialized() {
        let user = user_changed_at(Some(OffsetDateTime::now_utc()));
        let json = serde_json::to_value(&user).unwrap();
        let obj = json.as_object().unwrap();
        assert!(!obj.contains_key("password_hash"));
        assert!(!obj.contains_key("password_reset_token"));
        assert!(!obj.contains_key("password_reset_expires"));
        assert!(obj.contains_key("email"));
    }

    #[test]
    fn role_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_value(Role::LeadGuide).unwrap(),
            serde_json::json!("lead-guide")
        );
        let parsed: Role = serde_json::from_value(serde_json::json!("standard")).unwrap();
        assert_eq!(parsed, Role::Standard);
    }
}
