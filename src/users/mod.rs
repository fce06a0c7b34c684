use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use crate::auth::handlers as auth_handlers;
use crate::auth::middleware::{protect, restrict_to, soft_auth};
use crate::crud;
use crate::state::AppState;
use crate::users::repo::{Role, User};

pub mod handlers;
pub mod repo;

pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/signup", post(auth_handlers::signup))
        .route("/login", post(auth_handlers::login))
        .route("/logout", get(auth_handlers::logout))
        .route("/forgotPassword", post(auth_handlers::forgot_password))
        .route("/resetPassword/:token", patch(auth_handlers::reset_password));

    let session = Router::new()
        .route("/session", get(handlers::session))
        .layer(middleware::from_fn_with_state(state.clone(), soft_auth));

    let me = Router::new()
        .route("/updateMyPassword", patch(auth_handlers::update_my_password))
        .route("/me", get(handlers::get_me))
        .route(
            "/me/photo",
            get(handlers::get_my_photo).patch(handlers::upload_my_photo),
        )
        .route("/updateMe", patch(handlers::update_me))
        .route("/deleteMe", axum::routing::delete(handlers::delete_me))
        .layer(middleware::from_fn_with_state(state.clone(), protect));

    let admin = Router::new()
        .route("/", get(crud::list::<User>).post(crud::create::<User>))
        .route(
            "/:id",
            get(crud::get_by_id::<User>)
                .patch(crud::update::<User>)
                .delete(crud::delete::<User>),
        )
        .layer(middleware::from_fn(restrict_to(&[Role::Admin])))
        .layer(middleware::from_fn_with_state(state, protect));

    public.merge(session).merge(me).merge(admin)
}
