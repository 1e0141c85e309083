// Workflow HTTP routes: health probes, admission, and read queries

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use conveyor_engine::{
    ActivityLog, ServiceError, StartWorkflowRequest, StoreError, Task, WorkflowInstance,
    WorkflowService,
};

use super::common::ErrorResponse;

const DEFAULT_LIMIT: i64 = 20;

/// App state for workflow routes
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<WorkflowService>,
}

impl AppState {
    pub fn new(service: Arc<WorkflowService>) -> Self {
        Self { service }
    }
}

/// Create workflow routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/readiness", get(readiness))
        .route("/workflows/available", get(available_workflows))
        .route("/workflows", get(list_workflows).post(start_workflow))
        .route("/workflows/:workflow_id", get(workflow_detail))
        .with_state(state)
}

/// Health probe response
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

/// Readiness probe response
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadinessResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Registered workflow names
#[derive(Debug, Serialize, ToSchema)]
pub struct AvailableWorkflowsResponse {
    pub workflows: Vec<String>,
}

/// Request body for starting a workflow
#[derive(Debug, Deserialize, ToSchema)]
pub struct StartWorkflowBody {
    /// Name of a registered workflow.
    #[schema(example = "OrderProcess")]
    pub workflow_name: String,
    /// Opaque input document handed to the first task.
    #[serde(default)]
    #[schema(example = json!({"order_id": "ORD-1001", "amount": 49.9}))]
    pub input_payload: serde_json::Value,
}

/// Response for a started workflow
#[derive(Debug, Serialize, ToSchema)]
pub struct StartWorkflowResponse {
    pub message: String,
    pub data: WorkflowInstance,
}

/// Pagination query for the workflow list
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListWorkflowsQuery {
    /// Page size, at least 1 (default 20).
    pub limit: Option<i64>,
    /// Rows to skip (default 0).
    pub offset: Option<i64>,
}

/// Paginated workflow list
#[derive(Debug, Serialize, ToSchema)]
pub struct ListWorkflowsResponse {
    pub workflows: Vec<WorkflowInstance>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Full view of one workflow instance
#[derive(Debug, Serialize, ToSchema)]
pub struct WorkflowDetailResponse {
    pub workflow: WorkflowInstance,
    pub tasks: Vec<Task>,
    #[serde(rename = "activityLogs")]
    pub activity_logs: Vec<ActivityLog>,
}

/// GET /health - Liveness probe
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse)),
    tag = "health"
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "conveyor",
    })
}

/// GET /readiness - Readiness probe (checks store connectivity)
#[utoipa::path(
    get,
    path = "/readiness",
    responses(
        (status = 200, description = "Store reachable", body = ReadinessResponse),
        (status = 503, description = "Store unreachable", body = ReadinessResponse)
    ),
    tag = "health"
)]
pub async fn readiness(
    State(state): State<AppState>,
) -> (StatusCode, Json<ReadinessResponse>) {
    match state.service.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready",
                database: Some("connected"),
                error: None,
            }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "database ping failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    status: "unavailable",
                    database: None,
                    error: Some("database connection failed".to_string()),
                }),
            )
        }
    }
}

/// GET /workflows/available - Names of registered workflows
#[utoipa::path(
    get,
    path = "/workflows/available",
    responses((status = 200, description = "Registered workflow names", body = AvailableWorkflowsResponse)),
    tag = "workflows"
)]
pub async fn available_workflows(
    State(state): State<AppState>,
) -> Json<AvailableWorkflowsResponse> {
    Json(AvailableWorkflowsResponse {
        workflows: state.service.available_workflows(),
    })
}

/// POST /workflows - Start a new workflow instance
#[utoipa::path(
    post,
    path = "/workflows",
    request_body = StartWorkflowBody,
    responses(
        (status = 201, description = "Workflow started", body = StartWorkflowResponse),
        (status = 400, description = "Malformed request body", body = ErrorResponse),
        (status = 500, description = "Unknown workflow or store failure", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn start_workflow(
    State(state): State<AppState>,
    Json(body): Json<StartWorkflowBody>,
) -> Result<(StatusCode, Json<StartWorkflowResponse>), (StatusCode, Json<ErrorResponse>)> {
    let instance = state
        .service
        .start(StartWorkflowRequest {
            workflow_name: body.workflow_name,
            input_payload: body.input_payload,
        })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "failed to start workflow");
            ErrorResponse::new(e.to_string()).into_response(StatusCode::INTERNAL_SERVER_ERROR)
        })?;

    Ok((
        StatusCode::CREATED,
        Json(StartWorkflowResponse {
            message: "workflow started successfully".to_string(),
            data: instance,
        }),
    ))
}

/// GET /workflows - List workflow instances, newest first
#[utoipa::path(
    get,
    path = "/workflows",
    params(ListWorkflowsQuery),
    responses(
        (status = 200, description = "Page of workflow instances", body = ListWorkflowsResponse),
        (status = 500, description = "Store failure", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<ListWorkflowsQuery>,
) -> Result<Json<ListWorkflowsResponse>, (StatusCode, Json<ErrorResponse>)> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).max(1);
    let offset = query.offset.unwrap_or(0).max(0);

    let workflows = state.service.list(limit, offset).await.map_err(|e| {
        tracing::error!(error = %e, "failed to list workflows");
        ErrorResponse::new(e.to_string()).into_response(StatusCode::INTERNAL_SERVER_ERROR)
    })?;
    let total = state.service.count().await.map_err(|e| {
        tracing::error!(error = %e, "failed to count workflows");
        ErrorResponse::new(e.to_string()).into_response(StatusCode::INTERNAL_SERVER_ERROR)
    })?;

    Ok(Json(ListWorkflowsResponse {
        workflows,
        total,
        limit,
        offset,
    }))
}

/// GET /workflows/{workflow_id} - Instance with its tasks and activity log
#[utoipa::path(
    get,
    path = "/workflows/{workflow_id}",
    params(("workflow_id" = Uuid, Path, description = "Workflow instance ID")),
    responses(
        (status = 200, description = "Workflow detail", body = WorkflowDetailResponse),
        (status = 404, description = "Workflow not found", body = ErrorResponse),
        (status = 500, description = "Store failure", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn workflow_detail(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> Result<Json<WorkflowDetailResponse>, (StatusCode, Json<ErrorResponse>)> {
    let workflow = state.service.by_id(workflow_id).await.map_err(|e| match e {
        ServiceError::Store(StoreError::WorkflowNotFound(_)) => {
            ErrorResponse::new("workflow not found").into_response(StatusCode::NOT_FOUND)
        }
        other => {
            tracing::error!(error = %other, "failed to get workflow");
            ErrorResponse::new(other.to_string()).into_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    })?;

    let tasks = state
        .service
        .tasks_by_workflow(workflow_id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "failed to get tasks");
            ErrorResponse::new(e.to_string()).into_response(StatusCode::INTERNAL_SERVER_ERROR)
        })?;
    let activity_logs = state
        .service
        .logs_by_workflow(workflow_id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "failed to get activity logs");
            ErrorResponse::new(e.to_string()).into_response(StatusCode::INTERNAL_SERVER_ERROR)
        })?;

    Ok(Json(WorkflowDetailResponse {
        workflow,
        tasks,
        activity_logs,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use conveyor_engine::{InMemoryWorkflowStore, WorkflowRegistry};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_router() -> (Arc<InMemoryWorkflowStore>, Router) {
        let store = Arc::new(InMemoryWorkflowStore::new());
        let mut registry = WorkflowRegistry::new();
        registry
            .workflow("OrderProcess")
            .task("ValidateOrder", |_ctx| async { Ok(None) })
            .task("SendEmail", |_ctx| async { Ok(None) })
            .register()
            .unwrap();

        let service = Arc::new(WorkflowService::new(store.clone(), Arc::new(registry)));
        let router = routes(AppState::new(service));
        (store, router)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (_store, router) = test_router();
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "conveyor");
    }

    #[tokio::test]
    async fn test_readiness() {
        let (_store, router) = test_router();
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/readiness")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ready");
        assert_eq!(body["database"], "connected");
    }

    #[tokio::test]
    async fn test_available_workflows() {
        let (_store, router) = test_router();
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/workflows/available")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["workflows"], serde_json::json!(["OrderProcess"]));
    }

    #[tokio::test]
    async fn test_start_workflow_created() {
        let (store, router) = test_router();
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/workflows")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"workflow_name":"OrderProcess","input_payload":{"order_id":"ORD-1"}}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["message"], "workflow started successfully");
        assert_eq!(body["data"]["workflow_name"], "OrderProcess");
        assert_eq!(body["data"]["status"], "PENDING");
        assert_eq!(store.workflow_count(), 1);
        assert_eq!(store.pending_task_count(), 1);
    }

    #[tokio::test]
    async fn test_start_unknown_workflow_is_500_and_inserts_nothing() {
        let (store, router) = test_router();
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/workflows")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"workflow_name":"Nope","input_payload":{}}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("unknown workflow"));
        assert_eq!(store.workflow_count(), 0);
    }

    #[tokio::test]
    async fn test_start_malformed_body_is_400() {
        let (_store, router) = test_router();
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/workflows")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_workflows_defaults() {
        let (_store, router) = test_router();

        // Seed one instance through the API
        let _ = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/workflows")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"workflow_name":"OrderProcess"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/workflows")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["workflows"].as_array().unwrap().len(), 1);
        assert_eq!(body["total"], 1);
        assert_eq!(body["limit"], 20);
        assert_eq!(body["offset"], 0);
    }

    #[tokio::test]
    async fn test_workflow_detail_shape() {
        let (_store, router) = test_router();

        let created = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/workflows")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"workflow_name":"OrderProcess"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let id = body_json(created).await["data"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = router
            .oneshot(
                Request::builder()
                    .uri(format!("/workflows/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["workflow"]["id"].as_str().unwrap(), id);
        assert_eq!(body["tasks"].as_array().unwrap().len(), 1);
        assert!(body["activityLogs"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_workflow_detail_not_found() {
        let (_store, router) = test_router();
        let response = router
            .oneshot(
                Request::builder()
                    .uri(format!("/workflows/{}", Uuid::now_v7()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
