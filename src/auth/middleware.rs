use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use futures_util::future::BoxFuture;
use tracing::debug;

use crate::auth::jwt::JwtKeys;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::users::repo::{Role, User};

pub const AUTH_COOKIE: &str = "jwt";

/// Identity resolved by `protect`, available to handlers as an extractor.
#[derive(Clone)]
pub struct CurrentUser(pub User);

/// Soft identity resolved by `soft_auth`; `None` means anonymous.
#[derive(Clone)]
pub struct MaybeUser(pub Option<User>);

fn bearer_or_cookie_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }
    CookieJar::from_headers(headers)
        .get(AUTH_COOKIE)
        .map(|c| c.value().to_string())
}

/// The authenticate gate: token → claims → live user → freshness check.
async fn resolve_identity(state: &AppState, headers: &HeaderMap) -> ApiResult<User> {
    let token = bearer_or_cookie_token(headers).ok_or_else(|| {
        ApiError::unauthorized("You are not logged in! Please log in to get access.")
    })?;

    let keys = JwtKeys::from_ref(state);
    let claims = keys
        .verify(&token)
        .map_err(|_| ApiError::unauthorized("Invalid or expired token"))?;

    let user = User::find_by_id(&state.db, claims.sub)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| {
            ApiError::unauthorized("The user belonging to this token does no longer exist.")
        })?;

    if user.changed_password_after(claims.iat as i64) {
        return Err(ApiError::unauthorized(
            "User recently changed password! Please log in again.",
        ));
    }
    Ok(user)
}

/// Authentication middleware: rejects the request unless a valid identity
/// can be resolved, then threads it through request extensions.
pub async fn protect(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = resolve_identity(&state, req.headers()).await?;
    debug!(user_id = %user.id, "request authenticated");
    req.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(req).await)
}

/// Soft variant for rendered views: any failure just means anonymous.
pub async fn soft_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let user = resolve_identity(&state, req.headers()).await.ok();
    req.extensions_mut().insert(MaybeUser(user));
    next.run(req).await
}

pub fn role_allowed(role: Role, allowed: &[Role]) -> bool {
    allowed.contains(&role)
}

/// Authorization gate layered after `protect`. Forbidden by default: only
/// the listed roles pass.
pub fn restrict_to(
    allowed: &'static [Role],
) -> impl Fn(Request, Next) -> BoxFuture<'static, Result<Response, ApiError>> + Clone {
    move |req: Request, next: Next| {
        Box::pin(async move {
            let user = req
                .extensions()
                .get::<CurrentUser>()
                .ok_or_else(|| {
                    ApiError::unauthorized("You are not logged in! Please log in to get access.")
                })?
                .clone();
            if !role_allowed(user.0.role, allowed) {
                return Err(ApiError::forbidden(
                    "You do not have permission to perform this action",
                ));
            }
            Ok(next.run(req).await)
        })
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<CurrentUser>().cloned().ok_or_else(|| {
            ApiError::unauthorized("You are not logged in! Please log in to get access.")
        })
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for MaybeUser {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<MaybeUser>()
            .cloned()
            .unwrap_or(MaybeUser(None)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer header-token"),
        );
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("jwt=cookie-token"),
        );
        assert_eq!(
            bearer_or_cookie_token(&headers).as_deref(),
            Some("header-token")
        );
    }

    #[test]
    fn cookie_is_used_when_no_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("other=x; jwt=cookie-token"),
        );
        assert_eq!(
            bearer_or_cookie_token(&headers).as_deref(),
            Some("cookie-token")
        );
    }

    #[test]
    fn missing_token_resolves_to_none() {
        let headers = HeaderMap::new();
        assert!(bearer_or_cookie_token(&headers).is_none());
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        assert!(bearer_or_cookie_token(&headers).is_none());
    }

    #[test]
    fn restrict_is_forbidden_by_default() {
        assert!(role_allowed(Role::Admin, &[Role::Admin, Role::LeadGuide]));
        assert!(role_allowed(Role::LeadGuide, &[Role::Admin, Role::LeadGuide]));
        assert!(!role_allowed(Role::Standard, &[Role::Admin, Role::LeadGuide]));
        assert!(!role_allowed(Role::Guide, &[Role::Admin]));
        assert!(!role_allowed(Role::Admin, &[]));
    }
}
