use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::crud::{ColumnKind, CrudResource, FilterColumn};
use crate::error::ApiResult;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Booking {
    pub id: Uuid,
    pub tour_id: Uuid,
    pub user_id: Uuid,
    pub price: f64,
    pub paid: bool,
    /// Checkout session that produced this booking; NULL for bookings
    /// entered by staff.
    pub session_id: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
pub struct BookingInput {
    pub tour: Uuid,
    pub user: Uuid,
    pub price: f64,
    #[serde(default = "default_paid")]
    pub paid: bool,
    #[serde(default)]
    pub session_id: Option<String>,
}

fn default_paid() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct BookingUpdate {
    pub price: Option<f64>,
    pub paid: Option<bool>,
}

impl Booking {
    /// A checkout session creates at most one booking; this is the
    /// idempotency lookup for repeated confirm redirects.
    pub async fn find_by_session_id(
        db: &PgPool,
        session_id: &str,
    ) -> anyhow::Result<Option<Booking>> {
        let booking = sqlx::query_as::<_, Booking>(
            "SELECT id, tour_id, user_id, price, paid, session_id, created_at \
             FROM bookings WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(db)
        .await?;
        Ok(booking)
    }
}

#[axum::async_trait]
impl CrudResource for Booking {
    const TABLE: &'static str = "bookings";
    const FILTERABLE: &'static [FilterColumn] = &[
        ("tour_id", ColumnKind::Text),
        ("user_id", ColumnKind::Text),
        ("price", ColumnKind::Number),
        ("paid", ColumnKind::Bool),
    ];
    const SORTABLE: &'static [&'static str] = &["price", "created_at"];

    type Create = BookingInput;
    type Update = BookingUpdate;

    async fn insert(db: &PgPool, input: Self::Create) -> ApiResult<Self> {
        let booking = sqlx::query_as::<_, Booking>(
            "INSERT INTO bookings (tour_id, user_id, price, paid, session_id) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, tour_id, user_id, price, paid, session_id, created_at",
        )
        .bind(input.tour)
        .bind(input.user)
        .bind(input.price)
        .bind(input.paid)
        .bind(input.session_id)
        .fetch_one(db)
        .await?;
        Ok(booking)
    }

    async fn apply_update(db: &PgPool, id: Uuid, input: Self::Update) -> ApiResult<Self> {
        let booking = sqlx::query_as::<_, Booking>(
            "UPDATE bookings SET price = COALESCE($2, price), paid = COALESCE($3, paid) \
             WHERE id = $1 \
             RETURNING id, tour_id, user_id, price, paid, session_id, created_at",
        )
        .bind(id)
        .bind(input.price)
        .bind(input.paid)
        .fetch_one(db)
        .await?;
        Ok(booking)
    }
}
