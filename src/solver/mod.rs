//! Solver client: claims expressions from the orchestrator, evaluates them
//! and reports the outcome, while a separate heartbeat keeps it registered.

pub mod client;
pub mod heartbeat;
pub mod retry;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::evaluator::{self, EvalError};
use crate::protocol::{ResultReport, TaskAssignment};
use crate::types::SolverName;

pub use client::{ClientError, OrchestratorClient};
pub use heartbeat::{HeartbeatActor, HeartbeatHandle};
pub use retry::RetryPolicy;

/// Settings shared by every solver of a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub orchestrator_url: String,
    pub heartbeat_interval_ms: u64,
    pub claim_retry: RetryPolicy,
    pub report_retry: RetryPolicy,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            orchestrator_url: "http://localhost:8082".to_string(),
            heartbeat_interval_ms: 1_000,
            claim_retry: RetryPolicy::default(),
            report_retry: RetryPolicy::for_reports(),
        }
    }
}

impl SolverConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverState {
    Idle,
    AwaitingTask,
    Evaluating,
    ReportingResult,
}

pub struct SolverWorker {
    name: SolverName,
    client: OrchestratorClient,
    config: SolverConfig,
    state: SolverState,
}

impl SolverWorker {
    pub fn new(name: SolverName, client: OrchestratorClient, config: SolverConfig) -> Self {
        Self {
            name,
            client,
            config,
            state: SolverState::Idle,
        }
    }

    pub fn name(&self) -> &SolverName {
        &self.name
    }

    pub fn state(&self) -> SolverState {
        self.state
    }

    fn transition(&mut self, next: SolverState) {
        debug!("{}: {:?} -> {:?}", self.name, self.state, next);
        self.state = next;
    }

    /// Run claim/evaluate/report cycles until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let heartbeat = HeartbeatActor::new(
            self.client.clone(),
            self.name.clone(),
            self.config.heartbeat_interval(),
        )
        .spawn(cancel.child_token());
        info!("{} started against {}", self.name, self.client.base_url());

        loop {
            match self.step(&cancel).await {
                Ok(report) => debug!("{}: reported `{}`", self.name, report.expression),
                Err(ClientError::Cancelled) => break,
                Err(e) => {
                    error!("{}: {}", self.name, e);
                    self.transition(SolverState::Idle);
                }
            }
        }

        heartbeat.shutdown().await;
        info!("{} stopped", self.name);
    }

    /// One full cycle: claim a task, evaluate it, report the outcome.
    pub async fn step(&mut self, cancel: &CancellationToken) -> Result<ResultReport, ClientError> {
        self.transition(SolverState::AwaitingTask);
        let assignment = self
            .config
            .claim_retry
            .run("claim", cancel, || self.client.claim(&self.name))
            .await?;
        info!("{}: solving `{}`", self.name, assignment.expression);

        self.transition(SolverState::Evaluating);
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            outcome = evaluator::evaluate(assignment.expression.as_str(), &assignment.times) => outcome,
        };
        let report = self.build_report(assignment, outcome);

        self.transition(SolverState::ReportingResult);
        self.config
            .report_retry
            .run("report", cancel, || self.client.report(&report))
            .await?;

        self.transition(SolverState::Idle);
        Ok(report)
    }

    fn build_report(&self, assignment: TaskAssignment, outcome: Result<f64, EvalError>) -> ResultReport {
        match outcome {
            Ok(value) => {
                let result = evaluator::format_result(value);
                info!("{}: `{}` = {}", self.name, assignment.expression, result);
                ResultReport::success(self.name.clone(), assignment.expression, result)
            }
            Err(e) => {
                warn!("{}: cannot evaluate `{}`: {}", self.name, assignment.expression, e);
                ResultReport::failure(self.name.clone(), assignment.expression)
            }
        }
    }
}

/// Several solvers sharing one process, named `"<prefix> <i>"`.
pub struct SolverPool {
    workers: Vec<SolverWorker>,
}

impl SolverPool {
    pub fn new(prefix: &str, count: usize, client: OrchestratorClient, config: SolverConfig) -> Self {
        let workers = (0..count)
            .map(|i| {
                SolverWorker::new(
                    SolverName::new(format!("{} {}", prefix, i)),
                    client.clone(),
                    config.clone(),
                )
            })
            .collect();

        Self { workers }
    }

    pub fn names(&self) -> Vec<&SolverName> {
        self.workers.iter().map(SolverWorker::name).collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Run every worker until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let handles: Vec<_> = self
            .workers
            .into_iter()
            .map(|worker| tokio::spawn(worker.run(cancel.clone())))
            .collect();

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("Solver task ended abnormally: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Expression;

    fn worker(name: &str) -> SolverWorker {
        let client = OrchestratorClient::new("http://127.0.0.1:1").unwrap();
        SolverWorker::new(SolverName::new(name), client, SolverConfig::default())
    }

    #[test]
    fn test_pool_names() {
        let client = OrchestratorClient::new("http://127.0.0.1:1").unwrap();
        let pool = SolverPool::new("Solver", 3, client, SolverConfig::default());

        let names: Vec<_> = pool.names().into_iter().map(|n| n.as_str()).collect();
        assert_eq!(names, vec!["Solver 0", "Solver 1", "Solver 2"]);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_build_report() {
        let worker = worker("Solver 0");
        let assignment = |e: &str| TaskAssignment {
            expression: Expression::new(e),
            times: crate::operation::OperationTimes::zero(),
        };

        let report = worker.build_report(assignment("9*4+2"), Ok(38.0));
        assert!(report.is_success());
        assert_eq!(report.result, "38");

        let report = worker.build_report(assignment("5/0+1"), Err(EvalError::DivideByZero));
        assert!(!report.is_success());
        assert_eq!(report.status, ResultReport::STATUS_FAILED);
        assert_eq!(report.expression.as_str(), "5/0+1");
    }

    #[tokio::test]
    async fn test_step_stops_on_cancel() {
        let mut worker = worker("Solver 0");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = worker.step(&cancel).await.unwrap_err();
        assert!(matches!(err, ClientError::Cancelled));
        assert_eq!(worker.state(), SolverState::AwaitingTask);
    }

    #[test]
    fn test_config_defaults() {
        let config = SolverConfig::default();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(1));
        assert!(config.claim_retry.max_elapsed_ms.is_none());
        assert!(config.report_retry.max_elapsed_ms.is_some());
    }
}
