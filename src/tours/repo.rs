use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use time::{Date, Month, OffsetDateTime};
use uuid::Uuid;

use crate::crud::{ColumnKind, CrudResource, FilterColumn};
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "tour_difficulty", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Difficult,
}

/// Catalogue entry. `secret` rows are invisible to every generic read;
/// `start_location` / `locations` hold the nested geo documents verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tour {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub duration: i32,
    pub max_group_size: i32,
    pub difficulty: Difficulty,
    pub ratings_average: f64,
    pub ratings_quantity: i32,
    pub price: f64,
    pub price_discount: Option<f64>,
    pub summary: String,
    pub description: Option<String>,
    pub image_cover: String,
    pub images: Vec<String>,
    pub start_dates: Vec<OffsetDateTime>,
    #[serde(skip_serializing, default)]
    pub secret: bool,
    pub start_lat: Option<f64>,
    pub start_lng: Option<f64>,
    pub start_location: Option<Value>,
    pub locations: Option<Value>,
    pub guides: Vec<Uuid>,
    pub created_at: OffsetDateTime,
}

const TOUR_COLUMNS: &str = "id, name, slug, duration, max_group_size, difficulty, \
     ratings_average, ratings_quantity, price, price_discount, summary, description, \
     image_cover, images, start_dates, secret, start_lat, start_lng, start_location, \
     locations, guides, created_at";

/// URL-safe identifier derived from the name. Lowercased, runs of
/// non-alphanumerics collapse to single hyphens.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_hyphen = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_hyphen = false;
        } else if !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

fn validate_name(name: &str) -> ApiResult<()> {
    let len = name.trim().chars().count();
    if len < 10 {
        return Err(ApiError::validation(
            "A tour name must have more or equal then 10 characters",
        ));
    }
    if len > 40 {
        return Err(ApiError::validation(
            "A tour name must have less or equal then 40 characters",
        ));
    }
    Ok(())
}

fn validate_discount(price: f64, discount: Option<f64>) -> ApiResult<()> {
    if let Some(d) = discount {
        if d >= price {
            return Err(ApiError::validation(format!(
                "Discount price ({d}) should be below regular price"
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TourInput {
    pub name: String,
    pub duration: i32,
    pub max_group_size: i32,
    pub difficulty: Difficulty,
    pub price: f64,
    pub price_discount: Option<f64>,
    pub summary: String,
    pub description: Option<String>,
    #[serde(default)]
    pub image_cover: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub start_dates: Vec<OffsetDateTime>,
    #[serde(default)]
    pub secret: bool,
    pub start_lat: Option<f64>,
    pub start_lng: Option<f64>,
    pub start_location: Option<Value>,
    pub locations: Option<Value>,
    #[serde(default)]
    pub guides: Vec<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TourUpdate {
    pub name: Option<String>,
    pub duration: Option<i32>,
    pub max_group_size: Option<i32>,
    pub difficulty: Option<Difficulty>,
    pub price: Option<f64>,
    pub price_discount: Option<f64>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub start_dates: Option<Vec<OffsetDateTime>>,
    pub secret: Option<bool>,
    pub start_lat: Option<f64>,
    pub start_lng: Option<f64>,
    pub start_location: Option<Value>,
    pub locations: Option<Value>,
    pub guides: Option<Vec<Uuid>>,
}

impl Tour {
    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<Tour>> {
        let tour = sqlx::query_as::<_, Tour>(&format!(
            "SELECT {TOUR_COLUMNS} FROM tours WHERE id = $1 AND NOT secret"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(tour)
    }

    /// Tours with a known start point, for the in-process geo filters.
    pub async fn with_start_point(db: &PgPool) -> anyhow::Result<Vec<Tour>> {
        let tours = sqlx::query_as::<_, Tour>(&format!(
            "SELECT {TOUR_COLUMNS} FROM tours \
             WHERE start_lat IS NOT NULL AND start_lng IS NOT NULL AND NOT secret"
        ))
        .fetch_all(db)
        .await?;
        Ok(tours)
    }

    pub async fn set_images(
        db: &PgPool,
        id: Uuid,
        image_cover: Option<&str>,
        images: Option<&[String]>,
    ) -> sqlx::Result<Tour> {
        sqlx::query_as::<_, Tour>(&format!(
            "UPDATE tours SET image_cover = COALESCE($2, image_cover), \
             images = COALESCE($3, images) \
             WHERE id = $1 RETURNING {TOUR_COLUMNS}"
        ))
        .bind(id)
        .bind(image_cover)
        .bind(images)
        .fetch_one(db)
        .await
    }
}

#[axum::async_trait]
impl CrudResource for Tour {
    const TABLE: &'static str = "tours";
    const FILTERABLE: &'static [FilterColumn] = &[
        ("duration", ColumnKind::Number),
        ("difficulty", ColumnKind::Text),
        ("price", ColumnKind::Number),
        ("ratings_average", ColumnKind::Number),
        ("ratings_quantity", ColumnKind::Number),
        ("max_group_size", ColumnKind::Number),
    ];
    const SORTABLE: &'static [&'static str] = &[
        "price",
        "ratings_average",
        "ratings_quantity",
        "duration",
        "name",
        "created_at",
    ];
    const READ_GUARD: Option<&'static str> = Some("NOT secret");

    type Create = TourInput;
    type Update = TourUpdate;

    async fn insert(db: &PgPool, input: Self::Create) -> ApiResult<Self> {
        validate_name(&input.name)?;
        validate_discount(input.price, input.price_discount)?;
        let name = input.name.trim().to_string();
        let slug = slugify(&name);
        let tour = sqlx::query_as::<_, Tour>(&format!(
            "INSERT INTO tours (name, slug, duration, max_group_size, difficulty, price, \
             price_discount, summary, description, image_cover, images, start_dates, secret, \
             start_lat, start_lng, start_location, locations, guides) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, COALESCE($10, 'default-tour.jpg'), \
             $11, $12, $13, $14, $15, $16, $17, $18) \
             RETURNING {TOUR_COLUMNS}"
        ))
        .bind(&name)
        .bind(&slug)
        .bind(input.duration)
        .bind(input.max_group_size)
        .bind(input.difficulty)
        .bind(input.price)
        .bind(input.price_discount)
        .bind(input.summary.trim())
        .bind(input.description)
        .bind(input.image_cover)
        .bind(&input.images)
        .bind(&input.start_dates)
        .bind(input.secret)
        .bind(input.start_lat)
        .bind(input.start_lng)
        .bind(input.start_location)
        .bind(input.locations)
        .bind(&input.guides)
        .fetch_one(db)
        .await?;
        Ok(tour)
    }

    async fn apply_update(db: &PgPool, id: Uuid, input: Self::Update) -> ApiResult<Self> {
        if let Some(ref name) = input.name {
            validate_name(name)?;
        }
        // Discount sanity needs the effective price when only one side moves.
        if input.price_discount.is_some() || input.price.is_some() {
            let current = Tour::find_by_id(db, id)
                .await
                .map_err(ApiError::Internal)?
                .ok_or_else(|| ApiError::not_found("No document found with that ID"))?;
            let price = input.price.unwrap_or(current.price);
            let discount = input.price_discount.or(current.price_discount);
            validate_discount(price, discount)?;
        }
        let name = input.name.map(|n| n.trim().to_string());
        let slug = name.as_deref().map(slugify);
        let tour = sqlx::query_as::<_, Tour>(&format!(
            "UPDATE tours SET name = COALESCE($2, name), slug = COALESCE($3, slug), \
             duration = COALESCE($4, duration), max_group_size = COALESCE($5, max_group_size), \
             difficulty = COALESCE($6, difficulty), price = COALESCE($7, price), \
             price_discount = COALESCE($8, price_discount), summary = COALESCE($9, summary), \
             description = COALESCE($10, description), start_dates = COALESCE($11, start_dates), \
             secret = COALESCE($12, secret), start_lat = COALESCE($13, start_lat), \
             start_lng = COALESCE($14, start_lng), \
             start_location = COALESCE($15, start_location), \
             locations = COALESCE($16, locations), guides = COALESCE($17, guides) \
             WHERE id = $1 RETURNING {TOUR_COLUMNS}"
        ))
        .bind(id)
        .bind(name)
        .bind(slug)
        .bind(input.duration)
        .bind(input.max_group_size)
        .bind(input.difficulty)
        .bind(input.price)
        .bind(input.price_discount)
        .bind(input.summary)
        .bind(input.description)
        .bind(input.start_dates)
        .bind(input.secret)
        .bind(input.start_lat)
        .bind(input.start_lng)
        .bind(input.start_location)
        .bind(input.locations)
        .bind(input.guides)
        .fetch_one(db)
        .await?;
        Ok(tour)
    }

    /// Single reads carry the tour's reviews inline.
    async fn expand(db: &PgPool, doc: &mut Value) -> ApiResult<()> {
        let Some(id) = doc
            .get("id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
        else {
            return Ok(());
        };
        let reviews = crate::reviews::repo::Review::for_tour(db, id)
            .await
            .map_err(ApiError::Internal)?;
        if let Value::Object(map) = doc {
            map.insert(
                "reviews".into(),
                serde_json::to_value(reviews).map_err(|e| ApiError::Internal(e.into()))?,
            );
        }
        Ok(())
    }
}

/// Aggregates per difficulty over well-rated tours.
#[derive(Debug, Serialize, FromRow)]
pub struct TourStats {
    pub difficulty: Difficulty,
    pub num_tours: i64,
    pub num_ratings: i64,
    pub avg_rating: f64,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
}

pub async fn stats_by_difficulty(db: &PgPool) -> anyhow::Result<Vec<TourStats>> {
    let stats = sqlx::query_as::<_, TourStats>(
        "SELECT difficulty, COUNT(*) AS num_tours, \
         COALESCE(SUM(ratings_quantity), 0)::bigint AS num_ratings, \
         COALESCE(AVG(ratings_average), 0) AS avg_rating, \
         COALESCE(AVG(price), 0) AS avg_price, \
         COALESCE(MIN(price), 0) AS min_price, \
         COALESCE(MAX(price), 0) AS max_price \
         FROM tours WHERE ratings_average >= 4.5 AND NOT secret \
         GROUP BY difficulty ORDER BY avg_price",
    )
    .fetch_all(db)
    .await?;
    Ok(stats)
}

/// One bucket of the per-month departure schedule.
#[derive(Debug, Serialize, FromRow)]
pub struct MonthlyPlanEntry {
    pub month: i32,
    pub num_tour_starts: i64,
    pub tours: Vec<String>,
}

pub async fn monthly_plan(db: &PgPool, year: i32) -> ApiResult<Vec<MonthlyPlanEntry>> {
    let start = Date::from_calendar_date(year, Month::January, 1)
        .map_err(|_| ApiError::validation("Please provide a valid year"))?
        .midnight()
        .assume_utc();
    let end = Date::from_calendar_date(year + 1, Month::January, 1)
        .map_err(|_| ApiError::validation("Please provide a valid year"))?
        .midnight()
        .assume_utc();

    let plan = sqlx::query_as::<_, MonthlyPlanEntry>(
        "SELECT EXTRACT(MONTH FROM d)::int AS month, COUNT(*) AS num_tour_starts, \
         ARRAY_AGG(name ORDER BY name) AS tours \
         FROM tours, UNNEST(start_dates) AS d \
         WHERE d >= $1 AND d < $2 AND NOT secret \
         GROUP BY month ORDER BY num_tour_starts DESC, month LIMIT 12",
    )
    .bind(start)
    .bind(end)
    .fetch_all(db)
    .await?;
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_and_trims() {
        assert_eq!(slugify("The Forest Hiker"), "the-forest-hiker");
        assert_eq!(slugify("  Sea --- Explorer! "), "sea-explorer");
        assert_eq!(slugify("Åland Trek 2025"), "land-trek-2025");
    }

    #[test]
    fn name_length_is_enforced() {
        assert!(validate_name("Too short").is_err());
        assert!(validate_name("The Forest Hiker").is_ok());
        assert!(validate_name(&"x".repeat(41)).is_err());
        assert!(validate_name(&"x".repeat(40)).is_ok());
    }

    #[test]
    fn discount_must_stay_below_price() {
        assert!(validate_discount(100.0, None).is_ok());
        assert!(validate_discount(100.0, Some(50.0)).is_ok());
        assert!(validate_discount(100.0, Some(100.0)).is_err());
        assert!(validate_discount(100.0, Some(150.0)).is_err());
    }

    #[test]
    fn difficulty_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(Difficulty::Difficult).unwrap(),
            serde_json::json!("difficult")
        );
        let d: Difficulty = serde_json::from_value(serde_json::json!("easy")).unwrap();
        assert_eq!(d, Difficulty::Easy);
    }

    #[test]
    fn secret_flag_is_not_serialized() {
        let tour = Tour {
            id: Uuid::new_v4(),
            name: "The Forest Hiker".into(),
            slug: "the-forest-hiker".into(),
            duration: 5,
            max_group_size: 25,
            difficulty: Difficulty::Easy,
            ratings_average: 4.5,
            ratings_quantity: 0,
            price: 397.0,
            price_discount: None,
            summary: "Breathtaking hike".into(),
            description: None,
            image_cover: "default-tour.jpg".into(),
            images: vec![],
            start_dates: vec![],
            secret: true,
            start_lat: None,
            start_lng: None,
            start_location: None,
            locations: None,
            guides: vec![],
            created_at: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_value(&tour).unwrap();
        assert!(!json.as_object().unwrap().contains_key("secret"));
        assert!(json.as_object().unwrap().contains_key("slug"));
    }
}
