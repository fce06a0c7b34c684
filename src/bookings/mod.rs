use axum::{middleware, routing::get, Router};

use crate::auth::middleware::{protect, restrict_to};
use crate::bookings::repo::Booking;
use crate::crud;
use crate::state::AppState;
use crate::users::repo::Role;

pub mod handlers;
pub mod repo;

const STAFF: &[Role] = &[Role::Admin, Role::LeadGuide];

pub fn router(state: AppState) -> Router<AppState> {
    let checkout = Router::new()
        .route(
            "/checkout-session/:tour_id",
            get(handlers::get_checkout_session),
        )
        .layer(middleware::from_fn_with_state(state.clone(), protect));

    // The provider redirect arrives without an auth cookie; the session
    // lookup is the authorization.
    let confirm = Router::new().route("/checkout-confirm", get(handlers::checkout_confirm));

    let admin = Router::new()
        .route("/", get(crud::list::<Booking>).post(crud::create::<Booking>))
        .route(
            "/:id",
            get(crud::get_by_id::<Booking>)
                .patch(crud::update::<Booking>)
                .delete(crud::delete::<Booking>),
        )
        .layer(middleware::from_fn(restrict_to(STAFF)))
        .layer(middleware::from_fn_with_state(state, protect));

    checkout.merge(confirm).merge(admin)
}
