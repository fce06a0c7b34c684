use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use crate::auth::middleware::{protect, restrict_to};
use crate::crud;
use crate::reviews::repo::Review;
use crate::state::AppState;
use crate::users::repo::Role;

pub mod handlers;
pub mod repo;

const AUTHORS: &[Role] = &[Role::Standard];
const MODERATORS: &[Role] = &[Role::Standard, Role::Admin];

/// Flat surface: list and inspect everywhere, write access limited to
/// review authors and admins.
pub fn router(state: AppState) -> Router<AppState> {
    let read = Router::new()
        .route("/", get(crud::list::<Review>))
        .route("/:id", get(crud::get_by_id::<Review>))
        .layer(middleware::from_fn_with_state(state.clone(), protect));

    let write = Router::new()
        .route(
            "/:id",
            patch(crud::update::<Review>).delete(handlers::delete_review),
        )
        .layer(middleware::from_fn(restrict_to(MODERATORS)))
        .layer(middleware::from_fn_with_state(state, protect));

    read.merge(write)
}

/// Mounted under a tour, with the tour id taken from the path.
pub fn nested_router(state: AppState) -> Router<AppState> {
    let read = Router::new()
        .route("/", get(handlers::list_for_tour))
        .layer(middleware::from_fn_with_state(state.clone(), protect));

    let write = Router::new()
        .route("/", post(handlers::create_for_tour))
        .layer(middleware::from_fn(restrict_to(AUTHORS)))
        .layer(middleware::from_fn_with_state(state, protect));

    read.merge(write)
}
