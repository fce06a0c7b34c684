use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::Redirect,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::auth::dto::PublicUser;
use crate::auth::handlers::{is_valid_email, normalize_email};
use crate::auth::middleware::{CurrentUser, MaybeUser};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::storage::ext_from_mime;
use crate::users::repo::User;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMeRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    // Present only to give password attempts a pointed rejection.
    pub password: Option<String>,
    pub password_confirm: Option<String>,
}

#[instrument(skip(user))]
pub async fn get_me(CurrentUser(user): CurrentUser) -> Json<Value> {
    Json(json!({ "status": "success", "data": { "user": PublicUser::from(user) } }))
}

/// Who-am-i for anonymous-tolerant clients; never rejects.
#[instrument(skip(user))]
pub async fn session(MaybeUser(user): MaybeUser) -> Json<Value> {
    Json(json!({
        "status": "success",
        "data": { "user": user.map(PublicUser::from) },
    }))
}

#[instrument(skip(state, user, payload))]
pub async fn update_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<UpdateMeRequest>,
) -> ApiResult<Json<Value>> {
    if payload.password.is_some() || payload.password_confirm.is_some() {
        return Err(ApiError::validation(
            "This route is not for password updates. Please use /updateMyPassword.",
        ));
    }
    let email = match payload.email {
        Some(e) => {
            let e = normalize_email(&e);
            if !is_valid_email(&e) {
                return Err(ApiError::validation("Please provide a valid email"));
            }
            Some(e)
        }
        None => None,
    };

    let updated = User::update_profile(
        &state.db,
        user.id,
        payload.name.as_deref().map(str::trim),
        email.as_deref(),
        None,
    )
    .await?;
    Ok(Json(
        json!({ "status": "success", "data": { "user": PublicUser::from(updated) } }),
    ))
}

const DEFAULT_PHOTO: &str = "default.jpg";
const PHOTO_URL_TTL_SECS: u64 = 600;

/// The bucket is private; reads go through a short-lived presigned URL.
#[instrument(skip(state, user))]
pub async fn get_my_photo(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Redirect> {
    if user.photo == DEFAULT_PHOTO {
        return Err(ApiError::not_found("This user has no uploaded photo"));
    }
    let url = state
        .storage
        .presign_get(&user.photo, PHOTO_URL_TTL_SECS)
        .await
        .map_err(ApiError::Internal)?;
    Ok(Redirect::temporary(&url))
}

/// Single profile photo upload; the object key becomes the stored photo
/// reference.
#[instrument(skip(state, user, multipart))]
pub async fn upload_my_photo(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let mut uploaded: Option<String> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(e.to_string()))?
    {
        if field.name() != Some("photo") {
            continue;
        }
        let content_type = field
            .content_type()
            .map(|s| s.to_string())
            .unwrap_or_default();
        let ext = ext_from_mime(&content_type)
            .ok_or_else(|| ApiError::validation("Not an image! Please upload only images."))?;
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::validation(e.to_string()))?;
        let key = format!("users/{}-{}.{}", user.id, Uuid::new_v4(), ext);
        state
            .storage
            .put_object(&key, data, &content_type)
            .await
            .map_err(ApiError::Internal)?;
        uploaded = Some(key);
    }

    let key = uploaded.ok_or_else(|| ApiError::validation("photo field is required"))?;
    let updated = User::update_profile(&state.db, user.id, None, None, Some(key.as_str())).await?;

    // Replaced photos would otherwise pile up in the bucket.
    if user.photo != DEFAULT_PHOTO && user.photo != key {
        if let Err(e) = state.storage.delete_object(&user.photo).await {
            warn!(error = %e, key = %user.photo, "stale photo cleanup failed");
        }
    }

    Ok(Json(
        json!({ "status": "success", "data": { "user": PublicUser::from(updated) } }),
    ))
}

#[instrument(skip(state, user))]
pub async fn delete_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<StatusCode> {
    User::deactivate(&state.db, user.id)
        .await
        .map_err(ApiError::Internal)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::repo::Role;
    use axum::http::header::LOCATION;
    use axum::response::IntoResponse;
    use time::OffsetDateTime;

    fn user_with_photo(photo: &str) -> User {
        User {
            id: Uuid::new_v4(),
            name: "Test User".into(),
            email: "test@example.com".into(),
            photo: photo.into(),
            role: Role::Standard,
            password_hash: "hash".into(),
            password_changed_at: None,
            password_reset_token: None,
            password_reset_expires: None,
            active: true,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn photo_read_redirects_to_presigned_url() {
        let state = AppState::fake();
        let user = user_with_photo("users/abc.jpg");
        let redirect = get_my_photo(State(state), CurrentUser(user))
            .await
            .expect("redirect");
        let resp = redirect.into_response();
        assert_eq!(
            resp.headers().get(LOCATION).and_then(|v| v.to_str().ok()),
            Some("https://fake.local/users/abc.jpg")
        );
    }

    #[tokio::test]
    async fn default_photo_has_nothing_to_redirect_to() {
        let state = AppState::fake();
        let user = user_with_photo(DEFAULT_PHOTO);
        let err = get_my_photo(State(state), CurrentUser(user))
            .await
            .expect_err("no photo");
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
