//! Loopback HTTP API over the admin hook registry.
//!
//!   GET  /api/admin          list hooks
//!   GET  /api/admin/{name}   call a hook with no arguments
//!   POST /api/admin/{name}   call a hook with a JSON argument object

pub mod handlers;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/admin", get(handlers::handle_list))
        .route(
            "/admin/{name}",
            get(handlers::handle_call).post(handlers::handle_call_with_args),
        )
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

pub async fn serve(state: ApiState, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "admin API listening on 127.0.0.1");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
