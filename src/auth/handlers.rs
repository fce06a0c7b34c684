use axum::{
    extract::{FromRef, Path, State},
    http::StatusCode,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{instrument, warn};

use crate::auth::dto::{
    ForgotPasswordRequest, LoginRequest, PublicUser, ResetPasswordRequest, SignupRequest,
    UpdatePasswordRequest,
};
use crate::auth::jwt::JwtKeys;
use crate::auth::middleware::{CurrentUser, AUTH_COOKIE};
use crate::auth::password::{hash_password, validate_new_password, verify_password};
use crate::auth::reset::{generate_reset_token, hash_reset_token};
use crate::email;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::users::repo::User;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn auth_cookie(token: &str, ttl_days: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((AUTH_COOKIE, token.to_string()))
        .http_only(true)
        .secure(secure)
        .path("/")
        .max_age(time::Duration::days(ttl_days))
        .build()
}

fn logout_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((AUTH_COOKIE, "loggedout"))
        .http_only(true)
        .secure(secure)
        .path("/")
        .max_age(time::Duration::seconds(10))
        .build()
}

/// Issue a fresh identity token, set the auth cookie and build the
/// response body (password never serialized).
fn send_token(
    state: &AppState,
    jar: CookieJar,
    user: User,
    status: StatusCode,
) -> ApiResult<(StatusCode, CookieJar, Json<Value>)> {
    let keys = JwtKeys::from_ref(state);
    let token = keys.sign(user.id).map_err(ApiError::Internal)?;
    let jar = jar.add(auth_cookie(
        &token,
        state.config.jwt.ttl_days,
        state.config.env.is_production(),
    ));
    let body = json!({
        "status": "success",
        "token": token,
        "data": { "user": PublicUser::from(user) },
    });
    Ok((status, jar, Json(body)))
}

#[instrument(skip(state, jar, payload))]
pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(mut payload): Json<SignupRequest>,
) -> ApiResult<(StatusCode, CookieJar, Json<Value>)> {
    payload.email = normalize_email(&payload.email);
    if payload.name.trim().is_empty() {
        return Err(ApiError::validation("Please tell us your name"));
    }
    if !is_valid_email(&payload.email) {
        return Err(ApiError::validation("Please provide a valid email"));
    }
    validate_new_password(&payload.password, &payload.password_confirm)?;

    if User::find_by_email(&state.db, &payload.email)
        .await
        .map_err(ApiError::Internal)?
        .is_some()
    {
        return Err(ApiError::conflict("Email already registered"));
    }

    let hash = hash_password(&payload.password).map_err(ApiError::Internal)?;
    // Uniqueness is ultimately the store's constraint; a race here surfaces
    // as Conflict through the sqlx error mapping.
    let user = User::create(&state.db, payload.name.trim(), &payload.email, &hash).await?;

    let account_url = format!("{}/me", state.config.public_url);
    if let Err(e) = email::send_welcome(&*state.mailer, &user.email, &user.name, &account_url).await
    {
        warn!(error = %e, user_id = %user.id, "welcome email failed");
    }

    send_token(&state, jar, user, StatusCode::CREATED)
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(mut payload): Json<LoginRequest>,
) -> ApiResult<(StatusCode, CookieJar, Json<Value>)> {
    payload.email = normalize_email(&payload.email);
    if payload.email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::validation("Please provide email and password"));
    }

    let user = User::find_by_email(&state.db, &payload.email)
        .await
        .map_err(ApiError::Internal)?;
    let Some(user) = user else {
        return Err(ApiError::unauthorized("Incorrect email or password"));
    };
    let ok = verify_password(&payload.password, &user.password_hash)
        .map_err(ApiError::Internal)?;
    if !ok {
        return Err(ApiError::unauthorized("Incorrect email or password"));
    }

    send_token(&state, jar, user, StatusCode::OK)
}

/// Overwrites the auth cookie with a short-lived sentinel.
#[instrument(skip(state, jar))]
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<Value>) {
    let jar = jar.add(logout_cookie(state.config.env.is_production()));
    (jar, Json(json!({ "status": "success" })))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> ApiResult<Json<Value>> {
    let email_addr = normalize_email(&payload.email);
    let user = User::find_by_email(&state.db, &email_addr)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::not_found("There is no user with that email address."))?;

    let token = generate_reset_token();
    User::set_reset_token(&state.db, user.id, &token.digest, token.expires_at)
        .await
        .map_err(ApiError::Internal)?;

    let reset_url = format!(
        "{}/api/v1/users/resetPassword/{}",
        state.config.public_url, token.raw
    );
    if let Err(e) =
        email::send_password_reset(&*state.mailer, &user.email, &user.name, &reset_url).await
    {
        // Roll back the half-written reset state before failing.
        if let Err(clear_err) = User::clear_reset_token(&state.db, user.id).await {
            warn!(error = %clear_err, user_id = %user.id, "reset token rollback failed");
        }
        return Err(ApiError::Internal(anyhow::anyhow!(
            "error sending the password reset email: {e}"
        )));
    }

    Ok(Json(json!({
        "status": "success",
        "message": "Token sent to email!",
    })))
}

#[instrument(skip(state, jar, payload, token))]
pub async fn reset_password(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(token): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> ApiResult<(StatusCode, CookieJar, Json<Value>)> {
    validate_new_password(&payload.password, &payload.password_confirm)?;

    let digest = hash_reset_token(&token);
    let user = User::find_by_reset_digest(&state.db, &digest)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::validation("Token is invalid or has expired"))?;
    if !user.redeems_reset_token(&token, time::OffsetDateTime::now_utc()) {
        return Err(ApiError::validation("Token is invalid or has expired"));
    }

    let hash = hash_password(&payload.password).map_err(ApiError::Internal)?;
    // Clears the reset fields and bumps password_changed_at, so the token
    // cannot be consumed twice and older identity tokens go stale.
    User::update_password(&state.db, user.id, &hash)
        .await
        .map_err(ApiError::Internal)?;

    send_token(&state, jar, user, StatusCode::OK)
}

#[instrument(skip(state, jar, current, payload))]
pub async fn update_my_password(
    State(state): State<AppState>,
    jar: CookieJar,
    CurrentUser(current): CurrentUser,
    Json(payload): Json<UpdatePasswordRequest>,
) -> ApiResult<(StatusCode, CookieJar, Json<Value>)> {
    let ok = verify_password(&payload.password_current, &current.password_hash)
        .map_err(ApiError::Internal)?;
    if !ok {
        return Err(ApiError::unauthorized("Your current password is wrong."));
    }
    validate_new_password(&payload.password, &payload.password_confirm)?;

    let hash = hash_password(&payload.password).map_err(ApiError::Internal)?;
    User::update_password(&state.db, current.id, &hash)
        .await
        .map_err(ApiError::Internal)?;

    send_token(&state, jar, current, StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation_and_normalization() {
        assert!(is_valid_email("a@x.com"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("a@b"));
        assert_eq!(normalize_email("  A@X.Com "), "a@x.com");
    }

    #[test]
    fn auth_cookie_is_http_only_and_scoped() {
        let c = auth_cookie("tok", 90, true);
        assert_eq!(c.name(), AUTH_COOKIE);
        assert_eq!(c.value(), "tok");
        assert_eq!(c.http_only(), Some(true));
        assert_eq!(c.secure(), Some(true));
        assert_eq!(c.path(), Some("/"));
        assert_eq!(c.max_age(), Some(time::Duration::days(90)));
    }

    #[test]
    fn logout_cookie_is_a_short_lived_sentinel() {
        let c = logout_cookie(false);
        assert_eq!(c.value(), "loggedout");
        assert_eq!(c.max_age(), Some(time::Duration::seconds(10)));
    }
}
