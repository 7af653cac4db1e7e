//! In-memory registry of solvers known to the orchestrator.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::orchestrator::liveness::{Liveness, LivenessConfig};
use crate::types::{Expression, SolverName};

pub const STATUS_REGISTERED: &str = "Registered";
pub const STATUS_WORKING: &str = "Working";
pub const STATUS_FREE: &str = "Free";
pub const STATUS_REBOOTING: &str = "temporarily unavailable";
pub const STATUS_DIED: &str = "died";

/// What the orchestrator knows about one solver.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverEntry {
    pub name: SolverName,
    /// Task the solver is working on, if any.
    pub current_expression: Option<Expression>,
    pub last_heartbeat: DateTime<Utc>,
    pub status_text: String,
    pub liveness: Liveness,
}

impl SolverEntry {
    fn new(name: SolverName, now: DateTime<Utc>) -> Self {
        Self {
            name,
            current_expression: None,
            last_heartbeat: now,
            status_text: STATUS_REGISTERED.to_string(),
            liveness: Liveness::Fresh,
        }
    }

    fn idle_text(&self) -> &'static str {
        if self.current_expression.is_some() {
            STATUS_WORKING
        } else {
            STATUS_FREE
        }
    }
}

/// Result of one registry sweep.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepOutcome {
    /// Tasks held by solvers that just went silent.
    pub requeue: Vec<(SolverName, Expression)>,
    pub rebooting: Vec<SolverName>,
    pub died: Vec<SolverName>,
    pub evicted: Vec<SolverName>,
}

impl SweepOutcome {
    pub fn is_empty(&self) -> bool {
        self.requeue.is_empty()
            && self.rebooting.is_empty()
            && self.died.is_empty()
            && self.evicted.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct SolverRegistry {
    solvers: Mutex<HashMap<SolverName, SolverEntry>>,
}

impl SolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `name` if unseen. Returns true when the solver is new.
    pub async fn register(&self, name: &SolverName, now: DateTime<Utc>) -> bool {
        let mut solvers = self.solvers.lock().await;
        if solvers.contains_key(name) {
            return false;
        }

        info!("Solver registered: {}", name);
        solvers.insert(name.clone(), SolverEntry::new(name.clone(), now));
        true
    }

    /// Record a heartbeat, registering the solver if unseen.
    pub async fn heartbeat(&self, name: &SolverName, now: DateTime<Utc>) {
        let mut solvers = self.solvers.lock().await;
        let entry = solvers.entry(name.clone()).or_insert_with(|| {
            info!("Solver registered: {}", name);
            SolverEntry::new(name.clone(), now)
        });

        entry.last_heartbeat = now;
        if entry.liveness != Liveness::Fresh {
            info!("Solver {} is back after being {:?}", name, entry.liveness);
            entry.liveness = Liveness::Fresh;
            entry.status_text = entry.idle_text().to_string();
        }
    }

    /// The solver received `expression`.
    ///
    /// Returns the task the solver was still holding, which nothing tracks
    /// any more and must go back to the queue.
    pub async fn assign(
        &self,
        name: &SolverName,
        expression: &Expression,
        now: DateTime<Utc>,
    ) -> Option<Expression> {
        let mut solvers = self.solvers.lock().await;
        let entry = solvers
            .entry(name.clone())
            .or_insert_with(|| SolverEntry::new(name.clone(), now));

        entry.status_text = STATUS_WORKING.to_string();
        let previous = entry
            .current_expression
            .replace(expression.clone())
            .filter(|previous| previous != expression)?;

        warn!(
            "Solver {} took `{}` while still holding `{}`",
            name, expression, previous
        );
        Some(previous)
    }

    /// The solver finished its task.
    pub async fn release(&self, name: &SolverName, now: DateTime<Utc>) {
        let mut solvers = self.solvers.lock().await;
        let entry = solvers
            .entry(name.clone())
            .or_insert_with(|| SolverEntry::new(name.clone(), now));

        entry.current_expression = None;
        entry.status_text = STATUS_FREE.to_string();
    }

    pub async fn get(&self, name: &SolverName) -> Option<SolverEntry> {
        self.solvers.lock().await.get(name).cloned()
    }

    /// All entries, ordered by name.
    pub async fn snapshot(&self) -> Vec<SolverEntry> {
        let solvers = self.solvers.lock().await;
        let mut entries: Vec<SolverEntry> = solvers.values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub async fn len(&self) -> usize {
        self.solvers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.solvers.lock().await.is_empty()
    }

    /// Reclassify every solver against `now`.
    ///
    /// A solver that leaves Fresh hands back its task exactly once: the
    /// expression is taken out of the entry, so the later Dead transition
    /// finds nothing to requeue.
    pub async fn sweep(&self, now: DateTime<Utc>, config: &LivenessConfig) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();
        let mut solvers = self.solvers.lock().await;

        for entry in solvers.values_mut() {
            let silence = (now - entry.last_heartbeat).to_std().unwrap_or_default();
            let next = Liveness::classify(silence, config);
            if next == entry.liveness {
                continue;
            }

            match next {
                Liveness::Fresh => {
                    // Only a heartbeat restores freshness.
                    continue;
                }
                Liveness::Rebooting => {
                    if entry.liveness == Liveness::Dead {
                        continue;
                    }
                    debug!("Solver {} silent for {:?}", entry.name, silence);
                    entry.status_text = STATUS_REBOOTING.to_string();
                    outcome.rebooting.push(entry.name.clone());
                }
                Liveness::Dead => {
                    warn!("Solver {} died after {:?} of silence", entry.name, silence);
                    entry.status_text = STATUS_DIED.to_string();
                    outcome.died.push(entry.name.clone());
                }
            }

            if let Some(expression) = entry.current_expression.take() {
                outcome.requeue.push((entry.name.clone(), expression));
            }
            entry.liveness = next;
        }

        let evict_after = config.evict_after();
        solvers.retain(|name, entry| {
            let silence = (now - entry.last_heartbeat).to_std().unwrap_or_default();
            let keep = !(entry.liveness == Liveness::Dead && silence >= evict_after);
            if !keep {
                info!("Solver {} evicted after {:?} of silence", name, silence);
                // A dead solver can still claim, since claiming is not a heartbeat.
                if let Some(expression) = entry.current_expression.take() {
                    outcome.requeue.push((name.clone(), expression));
                }
                outcome.evicted.push(name.clone());
            }
            keep
        });

        outcome
    }
}
