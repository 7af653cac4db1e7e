use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, path::PathBuf};
use tracing::{debug, info};

use crate::orchestrator::LivenessConfig;
use crate::solver::SolverConfig;

/// Optional settings file shared by the server and the solvers.
///
/// ```json
/// {
///   "liveness": { "rebooting_after_ms": 2000, "dead_after_ms": 10000 },
///   "solver": { "orchestrator_url": "${ORCHESTRATOR_URL}" }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub liveness: LivenessConfig,
    pub solver: SolverConfig,
}

/// `CALC_CONFIG`, then `$XDG_CONFIG_HOME/calc/config.json`, then `./calc.json`.
pub fn resolve_settings_path() -> Option<PathBuf> {
    if let Ok(p) = env::var("CALC_CONFIG") {
        return Some(PathBuf::from(p));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg).join("calc").join("config.json");
        if candidate.exists() {
            return Some(candidate);
        }
    }

    let candidate = PathBuf::from("calc.json");
    if candidate.exists() {
        return Some(candidate);
    }

    None
}

/// Replace each `${NAME}` with the value of `NAME`; unset names stay as written.
fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        let end = start + 2 + len;

        out.push_str(&rest[..start]);
        match env::var(&rest[start + 2..end]) {
            Ok(value) => out.push_str(&value),
            Err(_) => out.push_str(&rest[start..=end]),
        }
        rest = &rest[end + 1..];
    }

    out.push_str(rest);
    out
}

pub fn load_settings_from(path: &Path) -> anyhow::Result<Settings> {
    let raw = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Could not read {}: {}", path.display(), e))?;
    let mut settings: Settings = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("Invalid settings in {}: {}", path.display(), e))?;

    settings.solver.orchestrator_url = expand_env_vars(&settings.solver.orchestrator_url);
    Ok(settings)
}

/// Load the settings file if one exists, defaults otherwise.
pub fn load_settings() -> anyhow::Result<Settings> {
    match resolve_settings_path() {
        Some(path) => {
            info!("Loading settings from {}", path.display());
            load_settings_from(&path)
        }
        None => {
            debug!("No settings file found, using defaults");
            Ok(Settings::default())
        }
    }
}
