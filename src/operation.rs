//! Arithmetic operators and the global operation timing table.
//!
//! Every operator carries a simulated cost in whole seconds. Solvers pause
//! for that long after applying the operator, which is what makes spreading
//! work across solvers (and across multiplicative groups) observable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::warn;

/// One of the four binary operators the evaluator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
}

impl Operator {
    pub const ALL: [Operator; 4] = [Operator::Add, Operator::Sub, Operator::Mul, Operator::Div];

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(Self::Add),
            '-' => Some(Self::Sub),
            '*' => Some(Self::Mul),
            '/' => Some(Self::Div),
            _ => None,
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let mut chars = symbol.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::from_char(c),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }

    /// `*` and `/` bind tighter than `+` and `-`.
    pub fn is_multiplicative(self) -> bool {
        matches!(self, Self::Mul | Self::Div)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Errors raised while applying a timing update.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimingError {
    #[error("unknown operator `{0}` (expected one of + - * /)")]
    UnknownOperator(String),
}

/// Operator → duration table, serialized with the operator symbols as keys:
/// `{"+": 1, "-": 1, "*": 1, "/": 1}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationTimes {
    #[serde(rename = "+", default)]
    add: u64,
    #[serde(rename = "-", default)]
    sub: u64,
    #[serde(rename = "*", default)]
    mul: u64,
    #[serde(rename = "/", default)]
    div: u64,
}

impl Default for OperationTimes {
    fn default() -> Self {
        Self::uniform(1)
    }
}

impl OperationTimes {
    /// Every operator costs the same number of seconds.
    pub fn uniform(seconds: u64) -> Self {
        Self {
            add: seconds,
            sub: seconds,
            mul: seconds,
            div: seconds,
        }
    }

    /// No simulated cost at all. Mostly useful in tests.
    pub fn zero() -> Self {
        Self::uniform(0)
    }

    pub fn seconds(&self, op: Operator) -> u64 {
        match op {
            Operator::Add => self.add,
            Operator::Sub => self.sub,
            Operator::Mul => self.mul,
            Operator::Div => self.div,
        }
    }

    pub fn set_seconds(&mut self, op: Operator, seconds: u64) {
        match op {
            Operator::Add => self.add = seconds,
            Operator::Sub => self.sub = seconds,
            Operator::Mul => self.mul = seconds,
            Operator::Div => self.div = seconds,
        }
    }

    pub fn delay(&self, op: Operator) -> Duration {
        Duration::from_secs(self.seconds(op))
    }

    pub fn with(mut self, op: Operator, seconds: u64) -> Self {
        self.set_seconds(op, seconds);
        self
    }

    /// Apply a partial update keyed by operator symbol.
    ///
    /// The update is all-or-nothing: a single unknown key rejects it and
    /// leaves `self` untouched.
    pub fn apply_update(&mut self, update: &BTreeMap<String, u64>) -> Result<(), TimingError> {
        let mut next = *self;
        for (symbol, seconds) in update {
            let op = Operator::from_symbol(symbol)
                .ok_or_else(|| TimingError::UnknownOperator(symbol.clone()))?;
            next.set_seconds(op, *seconds);
        }
        *self = next;
        Ok(())
    }

    /// Rebuild the table from persisted `(operator, seconds)` rows.
    ///
    /// Falls back to [`OperationTimes::default`] when the rows are empty,
    /// when there are more rows than operators, or when any row names an
    /// unknown operator or a negative duration. Operators missing from an
    /// otherwise valid table keep their default.
    pub fn from_rows<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, i64)>,
    {
        let rows: Vec<(&str, i64)> = rows.into_iter().collect();

        if rows.is_empty() {
            warn!("Operation table is empty, using default operation times");
            return Self::default();
        }
        if rows.len() > Operator::ALL.len() {
            warn!(
                "Operation table has {} rows (at most {} expected), using default operation times",
                rows.len(),
                Operator::ALL.len()
            );
            return Self::default();
        }

        let mut times = Self::default();
        for (symbol, seconds) in rows {
            let Some(op) = Operator::from_symbol(symbol) else {
                warn!(
                    "Operation table contains unknown operator `{}`, using default operation times",
                    symbol
                );
                return Self::default();
            };
            let Ok(seconds) = u64::try_from(seconds) else {
                warn!(
                    "Operation table has negative time {} for `{}`, using default operation times",
                    seconds, symbol
                );
                return Self::default();
            };
            times.set_seconds(op, seconds);
        }

        times
    }

    /// Iterate `(operator, seconds)` in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = (Operator, u64)> + '_ {
        Operator::ALL.into_iter().map(|op| (op, self.seconds(op)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_symbols_round_trip() {
        for op in Operator::ALL {
            assert_eq!(Operator::from_symbol(op.symbol()), Some(op));
        }
        assert_eq!(Operator::from_symbol("^"), None);
        assert_eq!(Operator::from_symbol("++"), None);
        assert_eq!(Operator::from_symbol(""), None);
    }

    #[test]
    fn test_times_serialize_with_symbol_keys() {
        let times = OperationTimes::default().with(Operator::Mul, 3);
        let value = serde_json::to_value(times).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"+": 1, "-": 1, "*": 3, "/": 1})
        );
    }

    #[test]
    fn test_times_deserialize_missing_keys_as_zero() {
        let times: OperationTimes = serde_json::from_str(r#"{"*": 2}"#).unwrap();
        assert_eq!(times.seconds(Operator::Mul), 2);
        assert_eq!(times.seconds(Operator::Add), 0);
    }

    #[test]
    fn test_from_rows_empty_falls_back() {
        let times = OperationTimes::from_rows(Vec::<(&str, i64)>::new());
        assert_eq!(times, OperationTimes::uniform(1));
    }

    #[test]
    fn test_from_rows_unknown_key_falls_back() {
        let times = OperationTimes::from_rows(vec![("+", 5), ("%", 2)]);
        assert_eq!(times, OperationTimes::uniform(1));
    }

    #[test]
    fn test_from_rows_too_many_rows_falls_back() {
        let rows = vec![("+", 5), ("-", 5), ("*", 5), ("/", 5), ("+", 7)];
        let times = OperationTimes::from_rows(rows);
        assert_eq!(times, OperationTimes::uniform(1));
    }

    #[test]
    fn test_from_rows_negative_falls_back() {
        let times = OperationTimes::from_rows(vec![("+", -1)]);
        assert_eq!(times, OperationTimes::uniform(1));
    }

    #[test]
    fn test_from_rows_partial_keeps_defaults() {
        let times = OperationTimes::from_rows(vec![("*", 4), ("/", 0)]);
        assert_eq!(times.seconds(Operator::Mul), 4);
        assert_eq!(times.seconds(Operator::Div), 0);
        assert_eq!(times.seconds(Operator::Add), 1);
        assert_eq!(times.seconds(Operator::Sub), 1);
    }

    #[test]
    fn test_apply_update_is_all_or_nothing() {
        let mut times = OperationTimes::default();

        let mut bad = BTreeMap::new();
        bad.insert("+".to_string(), 9);
        bad.insert("x".to_string(), 9);
        assert_eq!(
            times.apply_update(&bad),
            Err(TimingError::UnknownOperator("x".to_string()))
        );
        assert_eq!(times, OperationTimes::default());

        let mut good = BTreeMap::new();
        good.insert("/".to_string(), 7);
        times.apply_update(&good).unwrap();
        assert_eq!(times.seconds(Operator::Div), 7);
        assert_eq!(times.seconds(Operator::Add), 1);
    }
}
