use crate::controller::{channel_controller, health_check_controller};
use crate::AppState;
use axum::{routing::get, Router};

pub fn define_routes(app_state: AppState) -> Router {
    Router::new()
        .merge(channel_routes(app_state))
        .merge(health_routes())
}

fn channel_routes(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/channel/:name",
            get(channel_controller::connect).options(channel_controller::connect),
        )
        .with_state(app_state)
}

fn health_routes() -> Router {
    Router::new().route("/health", get(health_check_controller::health_check))
}
