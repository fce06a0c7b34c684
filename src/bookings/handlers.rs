use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::middleware::CurrentUser;
use crate::bookings::repo::{Booking, BookingInput};
use crate::crud::CrudResource;
use crate::error::{ApiError, ApiResult};
use crate::payments::CheckoutRequest;
use crate::state::AppState;
use crate::tours::repo::Tour;

/// Opens a hosted checkout session for one tour. The redirect back lands
/// on `checkout_confirm`, which verifies payment with the provider.
#[instrument(skip(state, user))]
pub async fn get_checkout_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(tour_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let tour = Tour::find_by_id(&state.db, tour_id)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::not_found("There is no tour with that ID."))?;

    let req = CheckoutRequest {
        tour_id: tour.id,
        user_id: user.id,
        tour_name: tour.name.clone(),
        tour_summary: tour.summary.clone(),
        price: tour.price,
        customer_email: user.email.clone(),
        success_url: format!(
            "{}/api/v1/bookings/checkout-confirm?session_id={{CHECKOUT_SESSION_ID}}",
            state.config.public_url
        ),
        cancel_url: format!("{}/tour/{}", state.config.public_url, tour.slug),
    };
    let session = state
        .payments
        .create_checkout_session(&req)
        .await
        .map_err(ApiError::Internal)?;

    Ok(Json(json!({ "status": "success", "session": session })))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmParams {
    pub session_id: String,
}

/// Completion of the checkout redirect. Everything that matters comes
/// from the provider-side session lookup: payment state, amount, and the
/// tour and buyer ids stored in session metadata at creation time.
#[instrument(skip(state, params))]
pub async fn checkout_confirm(
    State(state): State<AppState>,
    Query(params): Query<ConfirmParams>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let session = state
        .payments
        .retrieve_session(&params.session_id)
        .await
        .map_err(|_| ApiError::validation("Checkout session not found"))?;

    if !session.is_paid() {
        return Err(ApiError::validation("Checkout session is not paid"));
    }
    let (Some(tour_id), Some(user_id)) = (session.metadata.tour_id, session.metadata.user_id)
    else {
        return Err(ApiError::validation("Checkout session is missing metadata"));
    };

    // Redirect handlers can fire more than once per session.
    if let Some(existing) = Booking::find_by_session_id(&state.db, &session.id)
        .await
        .map_err(ApiError::Internal)?
    {
        return Ok((
            StatusCode::OK,
            Json(json!({ "status": "success", "data": existing })),
        ));
    }

    let price = session.amount_total.unwrap_or(0) as f64 / 100.0;
    let booking = Booking::insert(
        &state.db,
        BookingInput {
            tour: tour_id,
            user: user_id,
            price,
            paid: true,
            session_id: Some(session.id),
        },
    )
    .await?;
    info!(booking_id = %booking.id, %tour_id, %user_id, "booking recorded");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "success", "data": booking })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::{CheckoutSession, PaymentClient, SessionMetadata, SessionStatus};
    use axum::async_trait;
    use std::sync::Arc;

    struct UnpaidPayments;

    #[async_trait]
    impl PaymentClient for UnpaidPayments {
        async fn create_checkout_session(
            &self,
            req: &CheckoutRequest,
        ) -> anyhow::Result<CheckoutSession> {
            Ok(CheckoutSession {
                id: "cs_unpaid".into(),
                url: Some(req.success_url.clone()),
            })
        }

        async fn retrieve_session(&self, session_id: &str) -> anyhow::Result<SessionStatus> {
            Ok(SessionStatus {
                id: session_id.to_string(),
                payment_status: "unpaid".into(),
                amount_total: Some(49700),
                metadata: SessionMetadata::default(),
            })
        }
    }

    fn state_with_payments(payments: Arc<dyn PaymentClient>) -> AppState {
        let base = AppState::fake();
        AppState::from_parts(base.db, base.config, base.storage, base.mailer, payments)
    }

    #[tokio::test]
    async fn confirm_rejects_unpaid_session() {
        let state = state_with_payments(Arc::new(UnpaidPayments));
        let err = checkout_confirm(
            State(state),
            Query(ConfirmParams {
                session_id: "cs_x".into(),
            }),
        )
        .await
        .expect_err("unpaid session must not book");
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn confirm_rejects_paid_session_without_metadata_ids() {
        // The stub provider reports paid but carries no tour/user ids.
        let state = AppState::fake();
        let err = checkout_confirm(
            State(state),
            Query(ConfirmParams {
                session_id: "cs_x".into(),
            }),
        )
        .await
        .expect_err("metadata ids are required");
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
