// Expression tokenizing and precedence grouping

use crate::evaluator::EvalError;
use crate::operation::Operator;

/// Literals and operators of a flat expression, in source order.
///
/// `operators[i]` sits between `literals[i]` and `literals[i + 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tokens {
    pub literals: Vec<f64>,
    pub operators: Vec<Operator>,
}

/// One operand of the additive fold.
#[derive(Debug, Clone, PartialEq)]
pub enum Group {
    /// A literal standing on its own between additive operators.
    Literal(f64),
    /// A maximal run of `*`/`/` together with its operands.
    Multiplicative {
        operands: Vec<f64>,
        operators: Vec<Operator>,
    },
}

/// Typed evaluation plan: `groups[0] additive[0] groups[1] additive[1] ...`.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub groups: Vec<Group>,
    pub additive: Vec<Operator>,
}

impl Plan {
    pub fn multiplicative_groups(&self) -> usize {
        self.groups
            .iter()
            .filter(|g| matches!(g, Group::Multiplicative { .. }))
            .count()
    }
}

/// Split an expression into literals and operators.
///
/// Rejects empty input, whitespace, parentheses, any character other than
/// digits, `.` and the four operators, leading/trailing operators, adjacent
/// operators and malformed numbers such as `1.2.3`.
pub fn tokenize(input: &str) -> Result<Tokens, EvalError> {
    if input.is_empty() {
        return Err(EvalError::malformed("expression is empty"));
    }

    let mut literals = Vec::new();
    let mut operators = Vec::new();
    let mut start = 0;

    for (pos, ch) in input.char_indices() {
        if ch.is_ascii_digit() || ch == '.' {
            continue;
        }

        let Some(op) = Operator::from_char(ch) else {
            return Err(EvalError::malformed(format!(
                "unexpected character `{}` at position {}",
                ch, pos
            )));
        };

        if start == pos {
            let reason = if pos == 0 {
                format!("expression starts with operator `{}`", op)
            } else {
                format!("adjacent operators at position {}", pos)
            };
            return Err(EvalError::malformed(reason));
        }

        literals.push(parse_literal(&input[start..pos])?);
        operators.push(op);
        start = pos + ch.len_utf8();
    }

    if start == input.len() {
        return Err(EvalError::malformed("expression ends with an operator"));
    }
    literals.push(parse_literal(&input[start..])?);

    Ok(Tokens {
        literals,
        operators,
    })
}

fn parse_literal(text: &str) -> Result<f64, EvalError> {
    let dots = text.chars().filter(|c| *c == '.').count();
    if dots > 1 || !text.chars().any(|c| c.is_ascii_digit()) {
        return Err(EvalError::malformed(format!("invalid number `{}`", text)));
    }

    text.parse::<f64>()
        .map_err(|e| EvalError::malformed(format!("invalid number `{}`: {}", text, e)))
}

/// Partition tokens into multiplicative runs and additive boundaries.
pub fn group(tokens: Tokens) -> Plan {
    let Tokens {
        literals,
        operators,
    } = tokens;

    let mut literals = literals.into_iter();
    let mut groups = Vec::new();
    let mut additive = Vec::new();

    // tokenize guarantees literals.len() == operators.len() + 1
    let mut operands = literals.next().into_iter().collect::<Vec<_>>();
    let mut run = Vec::new();

    for op in operators {
        let Some(next) = literals.next() else { break };
        if op.is_multiplicative() {
            run.push(op);
            operands.push(next);
        } else {
            groups.push(close_group(std::mem::take(&mut operands), std::mem::take(&mut run)));
            additive.push(op);
            operands.push(next);
        }
    }
    groups.push(close_group(operands, run));

    Plan { groups, additive }
}

fn close_group(operands: Vec<f64>, operators: Vec<Operator>) -> Group {
    if operators.is_empty() {
        Group::Literal(operands.first().copied().unwrap_or_default())
    } else {
        Group::Multiplicative {
            operands,
            operators,
        }
    }
}

/// Tokenize and group in one go.
pub fn parse(input: &str) -> Result<Plan, EvalError> {
    tokenize(input).map(group)
}

#[cfg(test)]
mod tests {
    use super::*;
    use Operator::*;

    fn assert_malformed(input: &str) {
        match tokenize(input) {
            Err(EvalError::MalformedExpression(_)) => {}
            other => panic!("expected malformed for {:?}, got {:?}", input, other),
        }
    }

    #[test]
    fn test_tokenize_integers_and_decimals() {
        let tokens = tokenize("12.5*3-0.25").unwrap();
        assert_eq!(tokens.literals, vec![12.5, 3.0, 0.25]);
        assert_eq!(tokens.operators, vec![Mul, Sub]);
    }

    #[test]
    fn test_tokenize_single_literal() {
        let tokens = tokenize("42").unwrap();
        assert_eq!(tokens.literals, vec![42.0]);
        assert!(tokens.operators.is_empty());
    }

    #[test]
    fn test_tokenize_rejects_malformed_input() {
        for input in [
            "", "+1", "*2+3", "1+", "1++2", "1*/2", "1 + 2", "(1+2)", "-1", "1.2.3", ".",
            "2+.", "x+1", "1,5",
        ] {
            assert_malformed(input);
        }
    }

    #[test]
    fn test_group_mixed_expression() {
        let plan = parse("0+1*2+3+4-5*6/7").unwrap();
        assert_eq!(plan.additive, vec![Add, Add, Add, Sub]);
        assert_eq!(
            plan.groups,
            vec![
                Group::Literal(0.0),
                Group::Multiplicative {
                    operands: vec![1.0, 2.0],
                    operators: vec![Mul],
                },
                Group::Literal(3.0),
                Group::Literal(4.0),
                Group::Multiplicative {
                    operands: vec![5.0, 6.0, 7.0],
                    operators: vec![Mul, Div],
                },
            ]
        );
        assert_eq!(plan.multiplicative_groups(), 2);
    }

    #[test]
    fn test_group_expression_boundaries() {
        // Runs touching either end of the expression.
        let plan = parse("2*3+4*5").unwrap();
        assert_eq!(plan.groups.len(), 2);
        assert_eq!(plan.additive, vec![Add]);
        assert_eq!(plan.multiplicative_groups(), 2);

        let plan = parse("9*4").unwrap();
        assert!(plan.additive.is_empty());
        assert_eq!(
            plan.groups,
            vec![Group::Multiplicative {
                operands: vec![9.0, 4.0],
                operators: vec![Mul],
            }]
        );

        let plan = parse("1+2-3").unwrap();
        assert_eq!(
            plan.groups,
            vec![Group::Literal(1.0), Group::Literal(2.0), Group::Literal(3.0)]
        );
        assert_eq!(plan.multiplicative_groups(), 0);
    }
}
