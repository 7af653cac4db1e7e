//! Periodic handshake that keeps a solver alive in the registry.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::solver::client::OrchestratorClient;
use crate::types::SolverName;

/// Handle to a running heartbeat, used for shutdown.
pub struct HeartbeatHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Stop the heartbeat and wait for it to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Heartbeat task ended abnormally: {}", e);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub struct HeartbeatActor {
    client: OrchestratorClient,
    solver: SolverName,
    period: Duration,
}

impl HeartbeatActor {
    pub fn new(client: OrchestratorClient, solver: SolverName, period: Duration) -> Self {
        Self {
            client,
            solver,
            period,
        }
    }

    /// Start beating; failures are logged and never stop the loop.
    pub fn spawn(self, cancel: CancellationToken) -> HeartbeatHandle {
        let token = cancel.clone();
        let task = tokio::spawn(async move { self.run(token).await });
        HeartbeatHandle { cancel, task }
    }

    async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    match self.client.handshake(&self.solver).await {
                        Ok(()) => debug!("{}: heartbeat sent", self.solver),
                        Err(e) => warn!("{}: heartbeat failed: {}", self.solver, e),
                    }
                }
            }
        }

        debug!("{}: heartbeat stopped", self.solver);
    }
}
