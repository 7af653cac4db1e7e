use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::operation::OperationTimes;
use crate::orchestrator::{Orchestrator, OrchestratorResult};
use crate::types::{Expression, SolverName};

/// A task moved to Assigned but not yet delivered to its solver.
///
/// Settle it with [`Reservation::finalize`] once the solver has the task, or
/// [`Reservation::revert`] to put it back. Dropping an unsettled reservation
/// reverts it in the background.
#[must_use = "an unsettled reservation returns its task to the queue when dropped"]
pub struct Reservation {
    orchestrator: Arc<Orchestrator>,
    solver: SolverName,
    expression: Expression,
    times: OperationTimes,
    settled: bool,
}

impl Reservation {
    pub(crate) fn new(
        orchestrator: Arc<Orchestrator>,
        solver: SolverName,
        expression: Expression,
        times: OperationTimes,
    ) -> Self {
        Self {
            orchestrator,
            solver,
            expression,
            times,
            settled: false,
        }
    }

    pub fn solver(&self) -> &SolverName {
        &self.solver
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    /// Operation costs as of the claim.
    pub fn times(&self) -> OperationTimes {
        self.times
    }

    /// The task reached the solver: record it as the solver's current work.
    ///
    /// A task the solver was still holding is returned to the queue.
    pub async fn finalize(mut self) {
        self.settled = true;
        let displaced = self
            .orchestrator
            .registry()
            .assign(&self.solver, &self.expression, Utc::now())
            .await;
        debug!("Task `{}` delivered to {}", self.expression, self.solver);

        if let Some(previous) = displaced {
            match self.orchestrator.requeue(&previous).await {
                Ok(true) => info!("Requeued `{}` abandoned by {}", previous, self.solver),
                Ok(false) => debug!("`{}` from {} was no longer Assigned", previous, self.solver),
                Err(e) => error!("Failed to requeue `{}` from {}: {}", previous, self.solver, e),
            }
        }
    }

    /// Put the task back in the queue. Returns whether it was still Assigned.
    pub async fn revert(mut self) -> OrchestratorResult<bool> {
        self.settled = true;
        self.orchestrator.requeue(&self.expression).await
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        warn!(
            "Task `{}` was not delivered to {}, returning it to the queue",
            self.expression, self.solver
        );

        let orchestrator = self.orchestrator.clone();
        let expression = self.expression.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = orchestrator.requeue(&expression).await {
                        error!("Failed to requeue undelivered task `{}`: {}", expression, e);
                    }
                });
            }
            Err(_) => error!(
                "No runtime to requeue undelivered task `{}`; it stays Assigned",
                expression
            ),
        }
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("solver", &self.solver)
            .field("expression", &self.expression)
            .field("times", &self.times)
            .field("settled", &self.settled)
            .finish()
    }
}
