//! String newtypes for the two kinds of text the orchestrator keys on.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declares a string newtype keyed, ordered and printed by its text.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(&self.0)
            }
        }
    };
}

newtype_string!(
    /// Unique name a solver process announces itself with.
    ///
    /// This is the registry key on the orchestrator side. Solvers started as
    /// a pool are named `"<prefix> <index>"`.
    SolverName
);

newtype_string!(
    /// Raw arithmetic expression text, e.g. `"2+2*2"`.
    ///
    /// The expression text is the natural key of a task: every lifecycle
    /// transition looks the task up by it.
    Expression
);

/// Sentinel rendered for a solver that holds no task.
pub const NO_EXPRESSION: &str = "none";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newtype_serializes_transparently() {
        let name = SolverName::new("Solver 1");
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"Solver 1\"");

        let back: SolverName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
    }

    #[test]
    fn test_display_honours_width() {
        let expression = Expression::new("2+2");
        assert_eq!(format!("[{:<5}]", expression), "[2+2  ]");
        assert_eq!(expression.to_string(), "2+2");
    }
}
