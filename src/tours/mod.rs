use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use crate::auth::middleware::{protect, restrict_to};
use crate::crud;
use crate::state::AppState;
use crate::tours::repo::Tour;
use crate::users::repo::Role;

pub mod handlers;
pub mod repo;

const STAFF: &[Role] = &[Role::Admin, Role::LeadGuide];
const PLANNERS: &[Role] = &[Role::Admin, Role::LeadGuide, Role::Guide];

pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/top-5-cheap", get(handlers::top_five_cheap))
        .route("/tour-stats", get(handlers::tour_stats))
        .route(
            "/tours-within/:distance/center/:latlng/unit/:unit",
            get(handlers::tours_within),
        )
        .route("/distances/:latlng/unit/:unit", get(handlers::distances))
        .route("/", get(crud::list::<Tour>))
        .route("/:id", get(crud::get_by_id::<Tour>));

    let planning = Router::new()
        .route("/monthly-plan/:year", get(handlers::monthly_plan))
        .layer(middleware::from_fn(restrict_to(PLANNERS)))
        .layer(middleware::from_fn_with_state(state.clone(), protect));

    let staff = Router::new()
        .route("/", post(crud::create::<Tour>))
        .route(
            "/:id",
            patch(crud::update::<Tour>).delete(crud::delete::<Tour>),
        )
        .route("/:id/images", patch(handlers::upload_tour_images))
        .layer(middleware::from_fn(restrict_to(STAFF)))
        .layer(middleware::from_fn_with_state(state.clone(), protect));

    public
        .merge(planning)
        .merge(staff)
        .nest("/:id/reviews", crate::reviews::nested_router(state))
}
