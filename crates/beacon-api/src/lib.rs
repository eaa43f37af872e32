pub mod admin;
pub mod auth;
pub mod context;
pub mod flash;
pub mod messages;
pub mod middleware;
pub mod render;
pub mod sort;

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
};

use crate::auth::AppState;

/// All HTTP routes. Layers run outermost first: session, viewer, then the
/// hook that queues persistent messages as flash.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/messages", get(messages::persistent_messages))
        .route("/messages/all", get(messages::all_messages))
        .route("/messages/banner", get(messages::banner));

    let user_routes = Router::new()
        .route("/alerts/dismiss/{message_id}", delete(messages::dismiss_message))
        .route_layer(from_fn(middleware::require_user));

    let staff_routes = Router::new()
        .route(
            "/admin/messages",
            get(admin::list_messages).post(admin::create_message),
        )
        .route("/admin/messages/{id}", put(admin::update_message))
        .route("/admin/messages/deactivate", post(admin::deactivate_messages))
        .route("/admin/messages/activate", post(admin::activate_messages))
        .route_layer(from_fn(middleware::require_staff));

    Router::new()
        .merge(public_routes)
        .merge(user_routes)
        .merge(staff_routes)
        .layer(from_fn_with_state(state.clone(), flash::queue_persistent_messages))
        .layer(from_fn_with_state(state.clone(), middleware::resolve_viewer))
        .layer(from_fn(middleware::session))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}
