//! Two-level precedence evaluator used by solvers.
//!
//! Expressions are flat: numeric literals separated by `+ - * /`. Every
//! maximal run of `*`/`/` is evaluated on its own tokio task, all runs in
//! parallel; the run results are then folded left-to-right with the
//! additive operators. After each applied operator the evaluator sleeps for
//! the operator's configured cost.

pub mod parser;

use std::time::Duration;
use tokio::task::JoinSet;
use tracing::debug;

use crate::operation::{OperationTimes, Operator};
pub use parser::{Group, Plan, Tokens, group, parse, tokenize};

/// Errors produced while evaluating an expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("division by zero")]
    DivideByZero,

    #[error("malformed expression: {0}")]
    MalformedExpression(String),

    /// A group task panicked or was cancelled.
    #[error("evaluation aborted: {0}")]
    Aborted(String),
}

impl EvalError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedExpression(reason.into())
    }
}

impl Operator {
    /// Apply the operator; division by exactly zero is an error.
    pub fn apply(self, lhs: f64, rhs: f64) -> Result<f64, EvalError> {
        match self {
            Operator::Add => Ok(lhs + rhs),
            Operator::Sub => Ok(lhs - rhs),
            Operator::Mul => Ok(lhs * rhs),
            Operator::Div if rhs == 0.0 => Err(EvalError::DivideByZero),
            Operator::Div => Ok(lhs / rhs),
        }
    }
}

/// Evaluate `expression`, pausing after every operator as `times` dictates.
pub async fn evaluate(expression: &str, times: &OperationTimes) -> Result<f64, EvalError> {
    let plan = parse(expression)?;
    debug!(
        "Evaluating `{}`: {} groups, {} multiplicative",
        expression,
        plan.groups.len(),
        plan.multiplicative_groups()
    );

    let Plan { groups, additive } = plan;
    let mut slots = vec![0.0; groups.len()];
    let mut pending = JoinSet::new();

    for (index, group) in groups.into_iter().enumerate() {
        match group {
            Group::Literal(value) => slots[index] = value,
            Group::Multiplicative {
                operands,
                operators,
            } => {
                let times = *times;
                pending.spawn(async move {
                    fold(&operands, &operators, &times)
                        .await
                        .map(|value| (index, value))
                });
            }
        }
    }

    // Returning early drops the JoinSet, which aborts the remaining groups.
    while let Some(joined) = pending.join_next().await {
        let (index, value) = joined.map_err(|e| EvalError::Aborted(e.to_string()))??;
        slots[index] = value;
    }

    fold(&slots, &additive, times).await
}

/// Left fold of `operands` with `operators`, sleeping after each step.
async fn fold(
    operands: &[f64],
    operators: &[Operator],
    times: &OperationTimes,
) -> Result<f64, EvalError> {
    let Some((&first, rest)) = operands.split_first() else {
        return Err(EvalError::malformed("no operands"));
    };

    let mut acc = first;
    for (&op, &rhs) in operators.iter().zip(rest) {
        acc = op.apply(acc, rhs)?;
        pause(times.delay(op)).await;
    }
    Ok(acc)
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Render a result the way it goes on the wire: `38`, `-6`, `0.5`.
pub fn format_result(value: f64) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    async fn eval(expression: &str) -> Result<f64, EvalError> {
        evaluate(expression, &OperationTimes::zero()).await
    }

    #[tokio::test]
    async fn test_two_level_precedence() {
        assert_eq!(eval("2+2/2-1*9").await.unwrap(), -6.0);
        assert_eq!(eval("9*4+2").await.unwrap(), 38.0);
        let value = eval("1-3/7+12*9").await.unwrap();
        assert!((value - 108.5714285714).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_left_to_right_within_levels() {
        assert_eq!(eval("8/4/2").await.unwrap(), 1.0);
        assert_eq!(eval("10-4-3").await.unwrap(), 3.0);
        assert_eq!(eval("2*3/4").await.unwrap(), 1.5);
        assert_eq!(eval("0+1*2+3+4-5*6/8").await.unwrap(), 5.25);
    }

    #[tokio::test]
    async fn test_single_literal_and_decimals() {
        assert_eq!(eval("7").await.unwrap(), 7.0);
        assert_eq!(eval("1.5*2+0.25").await.unwrap(), 3.25);
    }

    #[tokio::test]
    async fn test_divide_by_zero_fails() {
        assert_eq!(eval("5/0+1").await, Err(EvalError::DivideByZero));
        assert_eq!(eval("1+2*3/0.0").await, Err(EvalError::DivideByZero));
        assert_eq!(eval("0/5").await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_malformed_expression_fails() {
        assert!(matches!(
            eval("2++2").await,
            Err(EvalError::MalformedExpression(_))
        ));
        assert!(matches!(
            eval("").await,
            Err(EvalError::MalformedExpression(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_multiplicative_groups_run_concurrently() {
        let times = OperationTimes::zero()
            .with(Operator::Mul, 1)
            .with(Operator::Add, 1);

        let started = Instant::now();
        let value = evaluate("2*3+4*5", &times).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(value, 26.0);
        // Both `*` groups sleep in parallel (1s), then one `+` (1s).
        assert!(elapsed >= Duration::from_secs(2), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(3), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_divide_by_zero_aborts_slow_groups() {
        let times = OperationTimes::zero().with(Operator::Mul, 100);

        let started = Instant::now();
        let result = evaluate("1*1*1+5/0", &times).await;

        assert_eq!(result, Err(EvalError::DivideByZero));
        assert!(started.elapsed() < Duration::from_secs(100));
    }

    #[test]
    fn test_format_result() {
        assert_eq!(format_result(38.0), "38");
        assert_eq!(format_result(-6.0), "-6");
        assert_eq!(format_result(0.5), "0.5");
    }
}
