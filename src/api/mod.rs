// REST API endpoints for the orchestrator


use axum::{
    Router,
    body::{Body, Bytes},
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::orchestrator::{Orchestrator, OrchestratorError, Reservation};
use crate::protocol::{
    ExpressionRequest, OperationTimesRequest, ResultReport, SolverRequest, SolverView,
    TaskAssignment, TaskView, routes,
};

pub type AppState = Arc<Orchestrator>;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(routes::HEALTH, get(health_check))
        .route(routes::SOLVER_HANDSHAKE, post(solver_handshake))
        .route(routes::CLAIM_TASK, post(get_task_to_solving))
        .route(routes::REPORT_RESULT, post(set_result_of_expression))
        .route(routes::SUBMIT_EXPRESSION, post(add_arithmetic_expression))
        .route(routes::LIST_TASKS, get(get_list_of_tasks))
        .route(routes::LIST_SOLVERS, get(get_list_of_solvers))
        .route(routes::SET_OPERATION_TIMES, post(set_execution_time_of_operations))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Failures surfaced to HTTP callers.
#[derive(Debug)]
pub enum ApiError {
    /// The body could not be decoded.
    BadRequest(String),
    Orchestrator(OrchestratorError),
    Internal(String),
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        Self::Orchestrator(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
            ApiError::Orchestrator(err) => {
                let status = match &err {
                    OrchestratorError::NoWorkAvailable => StatusCode::NOT_FOUND,
                    OrchestratorError::InvalidTimings(_) => StatusCode::BAD_REQUEST,
                    OrchestratorError::NotFound(_) | OrchestratorError::Store(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, err.to_string())
            }
        };

        (status, message).into_response()
    }
}

fn decode<T: DeserializeOwned>(route: &str, body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        warn!("Rejecting {} body: {}", route, e);
        ApiError::BadRequest(format!("invalid JSON body: {}", e))
    })
}

async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

async fn solver_handshake(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, ApiError> {
    let request: SolverRequest = decode(routes::SOLVER_HANDSHAKE, &body)?;
    debug!("Heartbeat from {}", request.solver_name);

    state.heartbeat(&request.solver_name).await;
    Ok(StatusCode::OK)
}

/// Hand the oldest queued task to the calling solver.
///
/// The claim is only confirmed once the body has been fully handed to the
/// connection; a response dropped before that returns the task to the queue.
async fn get_task_to_solving(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let request: SolverRequest = decode(routes::CLAIM_TASK, &body)?;

    let reservation = state.claim(request.solver_name).await.inspect_err(|e| {
        if !matches!(e, OrchestratorError::NoWorkAvailable) {
            error!("Claim failed: {}", e);
        }
    })?;

    let assignment = TaskAssignment {
        expression: reservation.expression().clone(),
        times: reservation.times(),
    };
    let payload = match serde_json::to_vec(&assignment) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Failed to encode assignment: {}", e);
            if let Err(e) = reservation.revert().await {
                error!("Failed to requeue `{}`: {}", assignment.expression, e);
            }
            return Err(ApiError::Internal("failed to encode assignment".to_string()));
        }
    };

    Ok(delivery_response(payload, reservation))
}

/// Response whose body settles `reservation` after the payload is written.
fn delivery_response(payload: Vec<u8>, reservation: Reservation) -> Response {
    enum Delivery {
        Send(Bytes, Reservation),
        Confirm(Reservation),
    }

    let stream = futures::stream::unfold(
        Some(Delivery::Send(Bytes::from(payload), reservation)),
        |state| async move {
            match state? {
                Delivery::Send(bytes, reservation) => Some((
                    Ok::<_, Infallible>(bytes),
                    Some(Delivery::Confirm(reservation)),
                )),
                Delivery::Confirm(reservation) => {
                    reservation.finalize().await;
                    None
                }
            }
        },
    );

    (
        [(header::CONTENT_TYPE, "application/json")],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn set_result_of_expression(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let report: ResultReport = decode(routes::REPORT_RESULT, &body)?;

    match state.report_result(&report).await {
        Ok(outcome) => {
            debug!("Report for `{}`: {:?}", report.expression, outcome);
            Ok(StatusCode::OK)
        }
        Err(e) => {
            error!("Report from {} failed: {}", report.solver_name, e);
            Err(e.into())
        }
    }
}

async fn add_arithmetic_expression(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let request: ExpressionRequest = decode(routes::SUBMIT_EXPRESSION, &body)?;

    if let Some(sent) = request.time_to_send {
        let lag = chrono::Utc::now() - sent;
        debug!("`{}` arrived {}ms after it was sent", request.expression, lag.num_milliseconds());
    }

    state.submit(request.expression).await.map_err(|e| {
        error!("Submit failed: {}", e);
        ApiError::from(e)
    })?;
    Ok(StatusCode::OK)
}

async fn get_list_of_tasks(State(state): State<AppState>) -> Result<Json<Vec<TaskView>>, ApiError> {
    let tasks = state.list_tasks().await.map_err(|e| {
        error!("Listing tasks failed: {}", e);
        ApiError::from(e)
    })?;

    Ok(Json(tasks.into_iter().map(TaskView::from).collect()))
}

async fn get_list_of_solvers(State(state): State<AppState>) -> Json<Vec<SolverView>> {
    let solvers = state.list_solvers().await;
    Json(solvers.into_iter().map(SolverView::from).collect())
}

async fn set_execution_time_of_operations(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let request: OperationTimesRequest = decode(routes::SET_OPERATION_TIMES, &body)?;

    match state.set_operation_times(&request.times).await {
        Ok(times) => {
            info!("Operation costs set to {:?}", times);
            Ok(StatusCode::OK)
        }
        Err(e @ OrchestratorError::InvalidTimings(_)) => {
            warn!("Rejecting timing update: {}", e);
            Err(e.into())
        }
        Err(e) => {
            error!("Timing update failed: {}", e);
            Err(e.into())
        }
    }
}
