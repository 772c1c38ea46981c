//! REST API handlers.
//!
//! Spec changes go through `StateStore` first and are then handed to the
//! reconciler, so a stored target always has a running loop.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::{info, warn};

use kedge_autoscale::QueryError;
use kedge_core::ScalingTarget;
use kedge_state::StateError;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn state_error(e: &StateError) -> axum::response::Response {
    let status = match e {
        StateError::Invalid(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status).into_response()
}

fn target_id(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

// ── Targets ────────────────────────────────────────────────────

/// GET /api/v1/targets
pub async fn list_targets(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_targets() {
        Ok(targets) => ApiResponse::ok(targets).into_response(),
        Err(e) => state_error(&e),
    }
}

/// GET /api/v1/targets/{namespace}/{name}
pub async fn get_target(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.store.get_target(&target_id(&namespace, &name)) {
        Ok(Some(target)) => ApiResponse::ok(target).into_response(),
        Ok(None) => error_response("scaling target not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => state_error(&e),
    }
}

/// POST /api/v1/targets
///
/// Creates or replaces a target and (re)starts its loop. Returns 201 for
/// a new target, 200 for an update.
pub async fn apply_target(
    State(state): State<ApiState>,
    Json(spec): Json<ScalingTarget>,
) -> impl IntoResponse {
    let id = spec.id();
    let existed = match state.store.get_target(&id) {
        Ok(existing) => existing.is_some(),
        Err(e) => return state_error(&e),
    };

    let stored = match state.store.put_target(&spec) {
        Ok(stored) => stored,
        Err(e) => return state_error(&e),
    };

    if let Err(e) = state.reconciler.apply(stored.clone()).await {
        warn!(target_id = %id, error = %e, "stored target could not be started");
        return error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response();
    }

    info!(target_id = %id, generation = stored.generation, "scaling target applied");
    let status = if existed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    (status, ApiResponse::ok(stored)).into_response()
}

/// DELETE /api/v1/targets/{namespace}/{name}
pub async fn delete_target(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    let id = target_id(&namespace, &name);
    match state.store.delete_target(&id) {
        Ok(true) => {
            state.reconciler.remove(&id).await;
            info!(target_id = %id, "scaling target deleted");
            ApiResponse::ok("deleted").into_response()
        }
        Ok(false) => error_response("scaling target not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => state_error(&e),
    }
}

/// GET /api/v1/targets/{namespace}/{name}/status
pub async fn get_status(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.store.get_status(&target_id(&namespace, &name)) {
        Ok(Some(status)) => ApiResponse::ok(status).into_response(),
        Ok(None) => error_response("no status published yet", StatusCode::NOT_FOUND).into_response(),
        Err(e) => state_error(&e),
    }
}

// ── Metric queries ─────────────────────────────────────────────

/// GET /api/v1/targets/{namespace}/{name}/metrics/{metric}
///
/// The query string is passed to the scaler as a label selector.
pub async fn query_metric(
    State(state): State<ApiState>,
    Path((namespace, name, metric)): Path<(String, String, String)>,
    Query(selector): Query<BTreeMap<String, String>>,
) -> impl IntoResponse {
    let id = target_id(&namespace, &name);
    match state.query.query(&id, &metric, &selector).await {
        Ok(values) => ApiResponse::ok(values).into_response(),
        Err(e) => {
            let status = match &e {
                QueryError::TargetNotFound(_) | QueryError::MetricNotFound { .. } => {
                    StatusCode::NOT_FOUND
                }
                QueryError::Scaler(_) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
                QueryError::Scaler(_) => StatusCode::BAD_GATEWAY,
                QueryError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            if status != StatusCode::NOT_FOUND {
                warn!(target_id = %id, %metric, error = %e, "metric query failed");
            }
            error_response(&e.to_string(), status).into_response()
        }
    }
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let statuses = state.store.list_statuses().unwrap_or_default();
    let body = crate::prometheus::render_prometheus(&statuses);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use kedge_autoscale::{Engine, MetricQueryService, Policy, Reconciler};
    use kedge_core::{MetricTargetType, MetricValue, Trigger, WorkloadRef};
    use kedge_scaler::{
        LabelSelector, MetricSource, MetricSpec, MetricTarget, PollContext, Scaler, ScalerCatalog,
        ScalerConfig, ScalerError, ScalerRegistry, ScalerResult, StaticAuthResolver,
    };
    use kedge_state::StateStore;

    use super::*;

    /// Reports the selector size; `hang` never answers.
    struct LagScaler {
        metric: String,
        hang: bool,
    }

    #[async_trait]
    impl Scaler for LagScaler {
        async fn is_active(&self, _ctx: &PollContext) -> ScalerResult<bool> {
            Ok(false)
        }

        fn metric_specs(&self) -> Vec<MetricSpec> {
            vec![MetricSpec {
                name: self.metric.clone(),
                target: MetricTarget {
                    target_type: MetricTargetType::AverageValue,
                    value: 10.0,
                },
                source: MetricSource::External,
            }]
        }

        async fn get_metrics(
            &self,
            _ctx: &PollContext,
            metric_name: &str,
            selector: &LabelSelector,
        ) -> ScalerResult<Vec<MetricValue>> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(vec![MetricValue::new(metric_name, selector.len() as f64)])
        }

        async fn close(&self, _ctx: &PollContext) -> ScalerResult<()> {
            Ok(())
        }
    }

    fn test_state() -> ApiState {
        let store = StateStore::open_in_memory().unwrap();
        let catalog = ScalerCatalog::builtin().with("lag", |config: ScalerConfig| async move {
            let hang = config.parse_or("hang", false)?;
            Ok::<Arc<dyn Scaler>, ScalerError>(Arc::new(LagScaler {
                metric: config.metric_name("lag"),
                hang,
            }))
        });
        let engine = Arc::new(Engine::new(
            catalog,
            Arc::new(ScalerRegistry::default()),
            Arc::new(StaticAuthResolver::default()),
            Duration::from_millis(200),
        ));
        ApiState {
            reconciler: Arc::new(Reconciler::new(
                store.clone(),
                Arc::clone(&engine),
                Policy::default(),
            )),
            query: Arc::new(MetricQueryService::new(
                store.clone(),
                engine,
                Duration::from_millis(200),
            )),
            store,
        }
    }

    fn test_target(name: &str, hang: bool) -> ScalingTarget {
        ScalingTarget {
            namespace: "default".to_string(),
            name: name.to_string(),
            scale_target_ref: WorkloadRef {
                kind: "Deployment".to_string(),
                name: name.to_string(),
            },
            min_replica_count: 0,
            max_replica_count: 5,
            polling_interval_seconds: 30,
            cooldown_period_seconds: 300,
            triggers: vec![Trigger {
                trigger_type: "lag".to_string(),
                name: None,
                metadata: [("hang".to_string(), hang.to_string())].into(),
                auth_ref: None,
                metric_type: None,
            }],
            annotations: Default::default(),
            generation: 0,
        }
    }

    fn path(name: &str) -> Path<(String, String)> {
        Path(("default".to_string(), name.to_string()))
    }

    #[tokio::test]
    async fn list_targets_empty() {
        let resp = list_targets(State(test_state())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn apply_creates_then_updates() {
        let state = test_state();
        let target = test_target("orders", false);

        let resp = apply_target(State(state.clone()), Json(target.clone())).await;
        assert_eq!(resp.into_response().status(), StatusCode::CREATED);
        assert!(state.reconciler.is_running("default/orders").await);

        let mut changed = target;
        changed.max_replica_count = 8;
        let resp = apply_target(State(state.clone()), Json(changed)).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
        assert_eq!(
            state.store.get_target("default/orders").unwrap().unwrap().generation,
            2
        );

        let resp = get_target(State(state.clone()), path("orders")).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
        state.reconciler.stop_all().await;
    }

    #[tokio::test]
    async fn apply_rejects_invalid_spec() {
        let state = test_state();
        let mut target = test_target("orders", false);
        target.min_replica_count = 10;

        let resp = apply_target(State(state.clone()), Json(target)).await;
        assert_eq!(resp.into_response().status(), StatusCode::BAD_REQUEST);
        assert!(state.store.list_targets().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_stops_loop() {
        let state = test_state();
        apply_target(State(state.clone()), Json(test_target("orders", false))).await;

        let resp = delete_target(State(state.clone()), path("orders")).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
        assert!(!state.reconciler.is_running("default/orders").await);

        let resp = delete_target(State(state), path("orders")).await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_missing_target_and_status() {
        let state = test_state();
        let resp = get_target(State(state.clone()), path("nope")).await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
        let resp = get_status(State(state), path("nope")).await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_after_reconcile() {
        let state = test_state();
        let stored = state.store.put_target(&test_target("orders", false)).unwrap();
        state.reconciler.reconcile_once(&stored).await.unwrap();

        let resp = get_status(State(state), path("orders")).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metric_query_status_codes() {
        let state = test_state();
        state.store.put_target(&test_target("orders", false)).unwrap();
        state.store.put_target(&test_target("stuck", true)).unwrap();

        let ok = query_metric(
            State(state.clone()),
            Path(("default".into(), "orders".into(), "s0-lag".into())),
            Query(BTreeMap::from([("partition".to_string(), "0".to_string())])),
        )
        .await;
        assert_eq!(ok.into_response().status(), StatusCode::OK);

        let missing = query_metric(
            State(state.clone()),
            Path(("default".into(), "orders".into(), "s0-nope".into())),
            Query(BTreeMap::new()),
        )
        .await;
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);

        let slow = query_metric(
            State(state),
            Path(("default".into(), "stuck".into(), "s0-lag".into())),
            Query(BTreeMap::new()),
        )
        .await;
        assert_eq!(slow.into_response().status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let resp = prometheus_metrics(State(test_state())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }
}
