//! HTTP client for the orchestrator API.

use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::protocol::{
    ExpressionRequest, OperationTimesRequest, ResultReport, SolverRequest, SolverView,
    TaskAssignment, TaskView, routes,
};
use crate::types::{Expression, SolverName};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("orchestrator has no queued task")]
    NoWorkAvailable,

    #[error("orchestrator answered {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("cancelled")]
    Cancelled,

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<ClientError>,
    },
}

/// Thin typed wrapper over the orchestrator routes.
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    http: Client,
    base_url: String,
}

impl OrchestratorClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("calc-orchestrator/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }

    async fn post<B: Serialize>(&self, route: &str, body: &B) -> Result<Response, ClientError> {
        let response = self.http.post(self.url(route)).json(body).send().await?;
        check_status(response).await
    }

    async fn get<T: DeserializeOwned>(&self, route: &str) -> Result<T, ClientError> {
        let response = self.http.get(self.url(route)).send().await?;
        Ok(check_status(response).await?.json().await?)
    }

    /// Announce the solver; doubles as its heartbeat.
    pub async fn handshake(&self, solver: &SolverName) -> Result<(), ClientError> {
        self.post(
            routes::SOLVER_HANDSHAKE,
            &SolverRequest {
                solver_name: solver.clone(),
            },
        )
        .await?;
        Ok(())
    }

    pub async fn claim(&self, solver: &SolverName) -> Result<TaskAssignment, ClientError> {
        let request = SolverRequest {
            solver_name: solver.clone(),
        };
        let response = self.http.post(self.url(routes::CLAIM_TASK)).json(&request).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ClientError::NoWorkAvailable);
        }

        Ok(check_status(response).await?.json().await?)
    }

    pub async fn report(&self, report: &ResultReport) -> Result<(), ClientError> {
        self.post(routes::REPORT_RESULT, report).await?;
        Ok(())
    }

    pub async fn submit(&self, expression: &Expression) -> Result<(), ClientError> {
        self.post(
            routes::SUBMIT_EXPRESSION,
            &ExpressionRequest {
                expression: expression.clone(),
                time_to_send: Some(chrono::Utc::now()),
            },
        )
        .await?;
        Ok(())
    }

    pub async fn list_tasks(&self) -> Result<Vec<TaskView>, ClientError> {
        self.get(routes::LIST_TASKS).await
    }

    pub async fn list_solvers(&self) -> Result<Vec<SolverView>, ClientError> {
        self.get(routes::LIST_SOLVERS).await
    }

    pub async fn set_operation_times(&self, times: BTreeMap<String, u64>) -> Result<(), ClientError> {
        self.post(routes::SET_OPERATION_TIMES, &OperationTimesRequest { times })
            .await?;
        Ok(())
    }
}

async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status { status, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = OrchestratorClient::new("http://localhost:8082/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8082");
        assert_eq!(
            client.url(routes::CLAIM_TASK),
            "http://localhost:8082/getTaskToSolving"
        );
    }

    #[tokio::test]
    async fn test_unreachable_orchestrator_is_transport_error() {
        // Grab a free port, then close it again.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = OrchestratorClient::new(format!("http://{}", addr)).unwrap();
        let err = client.handshake(&SolverName::new("s")).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }
}
