//! kedge-api: REST API for Kedge.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/targets` | List scaling targets |
//! | POST | `/api/v1/targets` | Create or update a scaling target |
//! | GET | `/api/v1/targets/{namespace}/{name}` | Get a scaling target |
//! | DELETE | `/api/v1/targets/{namespace}/{name}` | Delete a scaling target |
//! | GET | `/api/v1/targets/{namespace}/{name}/status` | Last published status |
//! | GET | `/api/v1/targets/{namespace}/{name}/metrics/{metric}` | Query a metric; query string is the label selector |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;
pub mod prometheus;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use kedge_autoscale::{MetricQueryService, Reconciler};
use kedge_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub reconciler: Arc<Reconciler>,
    pub query: Arc<MetricQueryService>,
}

/// Build the complete API router (REST + metrics).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/targets", get(handlers::list_targets).post(handlers::apply_target))
        .route(
            "/targets/{namespace}/{name}",
            get(handlers::get_target).delete(handlers::delete_target),
        )
        .route("/targets/{namespace}/{name}/status", get(handlers::get_status))
        .route(
            "/targets/{namespace}/{name}/metrics/{metric}",
            get(handlers::query_metric),
        )
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
}
