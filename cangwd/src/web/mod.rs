//! Web server — axum management API for the running gateway.
//!
//! Shared state is the `GatewayControl` plus the simulated bus it was built
//! against, so handlers can both install/remove jobs and inject test frames
//! for exercising them without real hardware.

use std::sync::Arc;

use axum::Router;
use cangw_core::GatewayControl;
use cangw_sim::SimBus;
use tower_http::cors::{Any, CorsLayer};

pub mod routes;

pub struct AppState {
    pub control: GatewayControl,
    pub bus: Arc<SimBus>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/jobs",
            axum::routing::get(routes::list_jobs)
                .post(routes::create_job)
                .delete(routes::delete_all_jobs),
        )
        .route("/jobs/:id", axum::routing::delete(routes::delete_job))
        .route("/inject", axum::routing::post(routes::inject_frame))
        .with_state(state)
        .layer(cors)
}

/// Start the management API.
pub async fn serve(state: Arc<AppState>, host: String, port: u16) {
    let app = build_router(state);
    let addr = format!("{host}:{port}");

    log::info!("cangwd management API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
