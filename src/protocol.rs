//! JSON messages exchanged between the orchestrator, solvers and clients.
//!
//! Field names are camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::db::{TaskRecord, TaskStatus};
use crate::operation::OperationTimes;
use crate::orchestrator::registry::SolverEntry;
use crate::types::{Expression, NO_EXPRESSION, SolverName};

/// Route paths shared by the router and the HTTP client.
pub mod routes {
    pub const HEALTH: &str = "/health";
    pub const SOLVER_HANDSHAKE: &str = "/solverHandShake";
    pub const CLAIM_TASK: &str = "/getTaskToSolving";
    pub const REPORT_RESULT: &str = "/setResultOfExpression";
    pub const SUBMIT_EXPRESSION: &str = "/addArithmeticExpression";
    pub const LIST_TASKS: &str = "/getListOfTasks";
    pub const LIST_SOLVERS: &str = "/getListOfSolvers";
    pub const SET_OPERATION_TIMES: &str = "/setExecutionTimeOfOperations";
}

/// Body of the handshake and claim requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverRequest {
    pub solver_name: SolverName,
}

/// Task handed to a solver together with the current operation costs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssignment {
    pub expression: Expression,
    pub times: OperationTimes,
}

/// Outcome a solver sends back for an assigned expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultReport {
    pub solver_name: SolverName,
    pub expression: Expression,
    #[serde(default)]
    pub result: String,
    /// 0 on success, anything else is a failure.
    pub status: i32,
}

impl ResultReport {
    pub const STATUS_OK: i32 = 0;
    pub const STATUS_FAILED: i32 = 1;

    pub fn success(solver_name: SolverName, expression: Expression, result: String) -> Self {
        Self {
            solver_name,
            expression,
            result,
            status: Self::STATUS_OK,
        }
    }

    pub fn failure(solver_name: SolverName, expression: Expression) -> Self {
        Self {
            solver_name,
            expression,
            result: String::new(),
            status: Self::STATUS_FAILED,
        }
    }

    /// A report only counts as a success with status 0 and a non-empty result.
    pub fn is_success(&self) -> bool {
        self.status == Self::STATUS_OK && !self.result.is_empty()
    }
}

/// New expression submitted by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionRequest {
    pub expression: Expression,
    /// Client-side send time; informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_send: Option<DateTime<Utc>>,
}

/// Partial update of the operation cost table, keyed by operator symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationTimesRequest {
    pub times: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub id: String,
    pub expression: Expression,
    pub hash_id: String,
    pub status: TaskStatus,
    pub result: String,
    pub begin_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl From<TaskRecord> for TaskView {
    fn from(record: TaskRecord) -> Self {
        Self {
            id: record.id.to_string(),
            expression: Expression::new(record.expression),
            hash_id: record.hash_id,
            status: record.status,
            result: record.result,
            begin_time: record.begin_time.map(DateTime::<Utc>::from),
            end_time: record.end_time.map(DateTime::<Utc>::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverView {
    pub solver_name: SolverName,
    /// Current expression, or `"none"`.
    pub solving_expression: String,
    pub last_ping: DateTime<Utc>,
    pub info_string: String,
}

impl SolverView {
    pub fn current_expression(&self) -> Option<&str> {
        (self.solving_expression != NO_EXPRESSION).then_some(self.solving_expression.as_str())
    }
}

impl From<SolverEntry> for SolverView {
    fn from(entry: SolverEntry) -> Self {
        Self {
            solver_name: entry.name,
            solving_expression: entry
                .current_expression
                .map(|e| e.to_string())
                .unwrap_or_else(|| NO_EXPRESSION.to_string()),
            last_ping: entry.last_heartbeat,
            info_string: entry.status_text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::liveness::Liveness;
    use serde_json::json;

    #[test]
    fn test_report_uses_camel_case() {
        let report = ResultReport::success(
            SolverName::new("Solver 1"),
            Expression::new("2+2"),
            "4".to_string(),
        );
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(
            value,
            json!({"solverName": "Solver 1", "expression": "2+2", "result": "4", "status": 0})
        );
    }

    #[test]
    fn test_report_success_requires_result() {
        let mut report = ResultReport::success(
            SolverName::new("s"),
            Expression::new("1/0"),
            String::new(),
        );
        assert!(!report.is_success());

        report.result = "inf".to_string();
        assert!(report.is_success());

        let failed = ResultReport::failure(SolverName::new("s"), Expression::new("1/0"));
        assert!(!failed.is_success());
    }

    #[test]
    fn test_assignment_carries_operator_symbols() {
        let assignment = TaskAssignment {
            expression: Expression::new("2*3"),
            times: OperationTimes::default(),
        };
        let value = serde_json::to_value(&assignment).unwrap();
        assert_eq!(value["times"], json!({"+": 1, "-": 1, "*": 1, "/": 1}));
    }

    #[test]
    fn test_expression_request_time_is_optional() {
        let request: ExpressionRequest =
            serde_json::from_value(json!({"expression": "1+1"})).unwrap();
        assert!(request.time_to_send.is_none());

        let request: ExpressionRequest = serde_json::from_value(
            json!({"expression": "1+1", "timeToSend": "2024-01-01T00:00:00Z"}),
        )
        .unwrap();
        assert!(request.time_to_send.is_some());
    }

    #[test]
    fn test_solver_view_uses_none_sentinel() {
        let entry = SolverEntry {
            name: SolverName::new("Solver 1"),
            current_expression: None,
            last_heartbeat: Utc::now(),
            status_text: "Free".to_string(),
            liveness: Liveness::Fresh,
        };
        let view = SolverView::from(entry);
        assert_eq!(view.solving_expression, "none");
        assert!(view.current_expression().is_none());

        let value = serde_json::to_value(&view).unwrap();
        assert!(value.get("lastPing").is_some());
        assert_eq!(value["infoString"], "Free");
    }
}
