use axum::{routing::get, Router};

use super::handlers;
use super::server::AppState;

pub fn v1_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/ns",
            get(handlers::list_workspaces).post(handlers::create_workspace),
        )
        .route(
            "/ns/:name",
            get(handlers::get_workspace).delete(handlers::delete_workspace),
        )
}
