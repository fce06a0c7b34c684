use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;
use uuid::Uuid;

use crate::auth::middleware::CurrentUser;
use crate::crud::CrudResource;
use crate::error::{ApiError, ApiResult};
use crate::reviews::repo::{recalc_tour_ratings, Review, ReviewInput};
use crate::state::AppState;
use crate::tours::repo::Tour;

#[derive(Debug, Deserialize)]
pub struct ReviewBody {
    pub review: String,
    pub rating: f64,
}

#[instrument(skip(state))]
pub async fn list_for_tour(
    State(state): State<AppState>,
    Path(tour_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let reviews = Review::for_tour(&state.db, tour_id)
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(json!({
        "status": "success",
        "results": reviews.len(),
        "data": reviews,
    })))
}

/// Review author and target come from the authenticated identity and the
/// path, never from the body.
#[instrument(skip(state, user, body))]
pub async fn create_for_tour(
    State(state): State<AppState>,
    Path(tour_id): Path<Uuid>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<ReviewBody>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    Tour::find_by_id(&state.db, tour_id)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::not_found("No document found with that ID"))?;

    let review = Review::insert(
        &state.db,
        ReviewInput {
            review: body.review,
            rating: body.rating,
            tour: tour_id,
            user: user.id,
        },
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "success", "data": review })),
    ))
}

/// Delete keeps the tour's rating summary consistent, so it cannot go
/// through the generic handler.
#[instrument(skip(state))]
pub async fn delete_review(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let review = Review::find_by_id(&state.db, id)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::not_found("No document found with that ID"))?;

    sqlx::query("DELETE FROM reviews WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;
    recalc_tour_ratings(&state.db, review.tour_id)
        .await
        .map_err(ApiError::Internal)?;

    Ok(StatusCode::NO_CONTENT)
}
