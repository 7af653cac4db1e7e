//! Core orchestrator logic - owns the task store, the solver registry and
//! the operation cost table, and drives every task transition.

pub mod liveness;
pub mod registry;
pub mod reservation;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::{
    DatabaseConfig, Db, QueryBuilder, TaskCreate, TaskRecord, TaskStatus, create_connection,
    ensure_schema,
};
use crate::operation::{OperationTimes, TimingError};
use crate::protocol::ResultReport;
use crate::types::{Expression, SolverName};

pub use liveness::{Liveness, LivenessConfig, spawn_sweeper};
pub use registry::{SolverEntry, SolverRegistry, SweepOutcome};
pub use reservation::Reservation;

/// How many Queued tasks one claim attempt looks at before re-reading.
const CLAIM_CANDIDATES: u32 = 8;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("no queued task is available")]
    NoWorkAvailable,

    #[error("no task for expression `{0}`")]
    NotFound(Expression),

    #[error(transparent)]
    InvalidTimings(#[from] TimingError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// What a result report did to its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Done,
    Failed,
    /// The task had already left Assigned; nothing changed.
    Ignored(TaskStatus),
}

pub struct Orchestrator {
    db: Db,
    registry: SolverRegistry,
    times: RwLock<OperationTimes>,
    liveness: LivenessConfig,
}

impl Orchestrator {
    /// Connect to the store, define the schema and load the cost table.
    pub async fn new(config: DatabaseConfig, liveness: LivenessConfig) -> anyhow::Result<Self> {
        let db = create_connection(config).await?;
        ensure_schema(&db).await?;
        Self::with_db(db, liveness).await
    }

    /// Build on an existing connection whose schema is already in place.
    pub async fn with_db(db: Db, liveness: LivenessConfig) -> anyhow::Result<Self> {
        let rows = QueryBuilder::load_operation_times(&db).await?;
        let times = OperationTimes::from_rows(rows.iter().map(|r| (r.operation.as_str(), r.seconds)));
        info!("Operation costs: {}", describe_times(&times));

        Ok(Self {
            db,
            registry: SolverRegistry::new(),
            times: RwLock::new(times),
            liveness,
        })
    }

    /// Queue a new expression. The text is stored as given.
    pub async fn submit(&self, expression: Expression) -> OrchestratorResult<TaskRecord> {
        let task = QueryBuilder::create_task(
            &self.db,
            &TaskCreate {
                expression: expression.to_string(),
                hash_id: new_hash_id(),
            },
        )
        .await?;

        info!("Queued `{}` ({})", expression, task.hash_id);
        Ok(task)
    }

    /// Reserve the oldest Queued task for `solver`.
    pub async fn claim(self: &Arc<Self>, solver: SolverName) -> OrchestratorResult<Reservation> {
        self.registry.register(&solver, Utc::now()).await;

        loop {
            let candidates = QueryBuilder::queued_tasks(&self.db, CLAIM_CANDIDATES).await?;
            if candidates.is_empty() {
                return Err(OrchestratorError::NoWorkAvailable);
            }

            for task in candidates {
                let claimed = QueryBuilder::transition_task(
                    &self.db,
                    &task.expression,
                    TaskStatus::Queued,
                    TaskStatus::Assigned,
                )
                .await?;

                match claimed {
                    Some(task) => {
                        let times = *self.times.read().await;
                        info!("Assigned `{}` to {}", task.expression, solver);
                        return Ok(Reservation::new(
                            self.clone(),
                            solver,
                            Expression::new(task.expression),
                            times,
                        ));
                    }
                    None => debug!("`{}` was claimed concurrently", task.expression),
                }
            }
        }
    }

    pub async fn report_result(&self, report: &ResultReport) -> OrchestratorResult<ReportOutcome> {
        let expression = report.expression.as_str();
        let Some(task) = QueryBuilder::find_task_by_expression(&self.db, expression).await? else {
            warn!(
                "{} reported a result for unknown expression `{}`",
                report.solver_name, expression
            );
            return Err(OrchestratorError::NotFound(report.expression.clone()));
        };

        let updated = if report.is_success() {
            QueryBuilder::complete_task(&self.db, expression, &report.result).await?
        } else {
            QueryBuilder::transition_task(
                &self.db,
                expression,
                TaskStatus::Assigned,
                TaskStatus::Error,
            )
            .await?
        };

        let outcome = match updated {
            Some(task) if task.status == TaskStatus::Done => {
                info!("`{}` = {} (by {})", expression, task.result, report.solver_name);
                ReportOutcome::Done
            }
            Some(_) => {
                warn!(
                    "{} failed to evaluate `{}` (status {})",
                    report.solver_name, expression, report.status
                );
                ReportOutcome::Failed
            }
            None => {
                warn!(
                    "Ignoring report from {} for `{}`: task is {}",
                    report.solver_name, expression, task.status
                );
                ReportOutcome::Ignored(task.status)
            }
        };

        self.registry.release(&report.solver_name, Utc::now()).await;
        Ok(outcome)
    }

    pub async fn heartbeat(&self, solver: &SolverName) {
        self.registry.heartbeat(solver, Utc::now()).await;
    }

    pub async fn list_solvers(&self) -> Vec<SolverEntry> {
        self.registry.snapshot().await
    }

    pub async fn list_tasks(&self) -> OrchestratorResult<Vec<TaskRecord>> {
        Ok(QueryBuilder::list_tasks(&self.db).await?)
    }

    pub async fn operation_times(&self) -> OperationTimes {
        *self.times.read().await
    }

    /// Apply a partial cost update keyed by operator symbol.
    ///
    /// An unknown key rejects the whole update. The new table is persisted
    /// before it becomes visible to claims.
    pub async fn set_operation_times(
        &self,
        update: &BTreeMap<String, u64>,
    ) -> OrchestratorResult<OperationTimes> {
        let mut times = self.times.write().await;
        let mut next = *times;
        next.apply_update(update)?;

        QueryBuilder::save_operation_times(&self.db, &next).await?;
        *times = next;

        info!("Operation costs updated: {}", describe_times(&next));
        Ok(next)
    }

    /// Reclassify solvers and requeue tasks held by ones that went silent.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepOutcome {
        let outcome = self.registry.sweep(now, &self.liveness).await;

        for (solver, expression) in &outcome.requeue {
            match self.requeue(expression).await {
                Ok(true) => info!("Requeued `{}` from silent solver {}", expression, solver),
                Ok(false) => debug!("`{}` from {} was no longer Assigned", expression, solver),
                Err(e) => error!("Failed to requeue `{}` from {}: {}", expression, solver, e),
            }
        }

        outcome
    }

    /// Assigned → Queued. Returns false when the task was not Assigned.
    pub(crate) async fn requeue(&self, expression: &Expression) -> OrchestratorResult<bool> {
        let moved = QueryBuilder::transition_task(
            &self.db,
            expression.as_str(),
            TaskStatus::Assigned,
            TaskStatus::Queued,
        )
        .await?;
        Ok(moved.is_some())
    }

    pub(crate) fn registry(&self) -> &SolverRegistry {
        &self.registry
    }

    /// Get reference to the database.
    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn liveness(&self) -> &LivenessConfig {
        &self.liveness
    }
}

fn new_hash_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn describe_times(times: &OperationTimes) -> String {
    times
        .iter()
        .map(|(op, seconds)| format!("{}={}s", op, seconds))
        .collect::<Vec<_>>()
        .join(" ")
}
