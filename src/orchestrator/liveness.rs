//! Solver liveness classification and the periodic sweeper.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::orchestrator::Orchestrator;

/// Silence thresholds and sweep cadence, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// How often the sweeper scans the registry.
    pub sweep_interval_ms: u64,
    /// Silence after which a solver is considered rebooting.
    pub rebooting_after_ms: u64,
    /// Silence after which a solver is considered dead.
    pub dead_after_ms: u64,
    /// Silence after which a dead solver is dropped from the registry.
    pub evict_after_ms: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 1_000,
            rebooting_after_ms: 2_000,
            dead_after_ms: 10_000,
            evict_after_ms: 5 * 60 * 1_000,
        }
    }
}

impl LivenessConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn rebooting_after(&self) -> Duration {
        Duration::from_millis(self.rebooting_after_ms)
    }

    pub fn dead_after(&self) -> Duration {
        Duration::from_millis(self.dead_after_ms)
    }

    pub fn evict_after(&self) -> Duration {
        Duration::from_millis(self.evict_after_ms)
    }
}

/// Liveness of a solver, derived from time since its last heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Liveness {
    Fresh,
    Rebooting,
    Dead,
}

impl Liveness {
    pub fn classify(silence: Duration, config: &LivenessConfig) -> Self {
        if silence >= config.dead_after() {
            Self::Dead
        } else if silence >= config.rebooting_after() {
            Self::Rebooting
        } else {
            Self::Fresh
        }
    }
}

/// Spawn the sweeper loop; it stops when `cancel` fires.
pub fn spawn_sweeper(orchestrator: Arc<Orchestrator>, cancel: CancellationToken) -> JoinHandle<()> {
    let period = orchestrator.liveness().sweep_interval();

    tokio::spawn(async move {
        info!("Liveness sweeper started (every {:?})", period);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Liveness sweeper cancelled");
                    break;
                }
                _ = interval.tick() => {
                    orchestrator.sweep_at(Utc::now()).await;
                }
            }
        }

        info!("Liveness sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_thresholds() {
        let config = LivenessConfig::default();
        assert_eq!(Liveness::classify(Duration::ZERO, &config), Liveness::Fresh);
        assert_eq!(
            Liveness::classify(Duration::from_millis(1_999), &config),
            Liveness::Fresh
        );
        assert_eq!(
            Liveness::classify(Duration::from_secs(2), &config),
            Liveness::Rebooting
        );
        assert_eq!(
            Liveness::classify(Duration::from_millis(9_999), &config),
            Liveness::Rebooting
        );
        assert_eq!(
            Liveness::classify(Duration::from_secs(10), &config),
            Liveness::Dead
        );
    }

    #[test]
    fn test_config_deserializes_partially() {
        let config: LivenessConfig = serde_json::from_str(r#"{"dead_after_ms": 4000}"#).unwrap();
        assert_eq!(config.dead_after(), Duration::from_secs(4));
        assert_eq!(config.rebooting_after(), Duration::from_secs(2));
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
    }
}
