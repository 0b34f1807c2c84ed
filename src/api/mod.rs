pub mod handlers;
pub mod routes;
pub mod server;

pub use server::{api_router, metrics_router, serve, start_server, AppState};
