// Core modules
pub mod config;
pub mod db;
pub mod evaluator;
pub mod operation;
pub mod protocol;
pub mod types;

// Orchestrator side
pub mod api;
pub mod orchestrator;
pub mod server;

// Solver side
pub mod solver;

// Re-export key types and functions
pub use config::{Settings, load_settings};
pub use db::{DatabaseConfig, TaskStatus, create_connection, ensure_schema};
pub use evaluator::{EvalError, evaluate, format_result};
pub use operation::{OperationTimes, Operator};
pub use orchestrator::{LivenessConfig, Orchestrator, OrchestratorError};
pub use solver::{OrchestratorClient, SolverConfig, SolverPool};
pub use types::{Expression, SolverName};
