use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::crud::{ColumnKind, CrudResource, FilterColumn};
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Review {
    pub id: Uuid,
    pub review: String,
    pub rating: f64,
    pub tour_id: Uuid,
    pub user_id: Uuid,
    pub created_at: OffsetDateTime,
}

pub fn validate_rating(rating: f64) -> ApiResult<()> {
    if rating < 1.0 {
        return Err(ApiError::validation("Rating must be above 1.0"));
    }
    if rating > 5.0 {
        return Err(ApiError::validation("Rating must be below 5.0"));
    }
    Ok(())
}

impl Review {
    pub async fn for_tour(db: &PgPool, tour_id: Uuid) -> anyhow::Result<Vec<Review>> {
        let reviews = sqlx::query_as::<_, Review>(
            "SELECT id, review, rating, tour_id, user_id, created_at \
             FROM reviews WHERE tour_id = $1 ORDER BY created_at DESC",
        )
        .bind(tour_id)
        .fetch_all(db)
        .await?;
        Ok(reviews)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<Review>> {
        let review = sqlx::query_as::<_, Review>(
            "SELECT id, review, rating, tour_id, user_id, created_at \
             FROM reviews WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(review)
    }
}

/// Re-derives the tour's rating summary from its current reviews. A tour
/// with no reviews falls back to the 4.5 display default.
pub async fn recalc_tour_ratings(db: &PgPool, tour_id: Uuid) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE tours SET \
         ratings_quantity = stats.qty, \
         ratings_average = stats.avg \
         FROM ( \
             SELECT COUNT(*)::int AS qty, \
             COALESCE(ROUND(AVG(rating)::numeric, 1)::float8, 4.5) AS avg \
             FROM reviews WHERE tour_id = $1 \
         ) AS stats \
         WHERE tours.id = $1",
    )
    .bind(tour_id)
    .execute(db)
    .await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ReviewInput {
    pub review: String,
    pub rating: f64,
    pub tour: Uuid,
    pub user: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ReviewUpdate {
    pub review: Option<String>,
    pub rating: Option<f64>,
}

#[axum::async_trait]
impl CrudResource for Review {
    const TABLE: &'static str = "reviews";
    const FILTERABLE: &'static [FilterColumn] = &[
        ("rating", ColumnKind::Number),
        ("tour_id", ColumnKind::Text),
        ("user_id", ColumnKind::Text),
    ];
    const SORTABLE: &'static [&'static str] = &["rating", "created_at"];

    type Create = ReviewInput;
    type Update = ReviewUpdate;

    async fn insert(db: &PgPool, input: Self::Create) -> ApiResult<Self> {
        validate_rating(input.rating)?;
        if input.review.trim().is_empty() {
            return Err(ApiError::validation("Review can not be empty!"));
        }
        let review = sqlx::query_as::<_, Review>(
            "INSERT INTO reviews (review, rating, tour_id, user_id) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, review, rating, tour_id, user_id, created_at",
        )
        .bind(input.review.trim())
        .bind(input.rating)
        .bind(input.tour)
        .bind(input.user)
        .fetch_one(db)
        .await?;
        recalc_tour_ratings(db, review.tour_id)
            .await
            .map_err(ApiError::Internal)?;
        Ok(review)
    }

    async fn apply_update(db: &PgPool, id: Uuid, input: Self::Update) -> ApiResult<Self> {
        if let Some(rating) = input.rating {
            validate_rating(rating)?;
        }
        let review = sqlx::query_as::<_, Review>(
            "UPDATE reviews SET review = COALESCE($2, review), rating = COALESCE($3, rating) \
             WHERE id = $1 \
             RETURNING id, review, rating, tour_id, user_id, created_at",
        )
        .bind(id)
        .bind(input.review)
        .bind(input.rating)
        .fetch_one(db)
        .await?;
        recalc_tour_ratings(db, review.tour_id)
            .await
            .map_err(ApiError::Internal)?;
        Ok(review)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_bounds() {
        assert!(validate_rating(0.9).is_err());
        assert!(validate_rating(1.0).is_ok());
        assert!(validate_rating(5.0).is_ok());
        assert!(validate_rating(5.1).is_err());
    }
}
