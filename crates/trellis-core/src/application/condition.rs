//! Restricted boolean-expression evaluation over workflow state
//!
//! Tenant-authored conditions are parsed into a small tagged AST
//! (comparisons, boolean combinators, arithmetic) and interpreted directly.
//! There is deliberately no general expression engine here: workflow JSON
//! must never be able to execute arbitrary code.
//!
//! State references appear either as `{{dotted.path}}` placeholders or as
//! bare dotted identifiers; both resolve against the state map at
//! evaluation time. Missing paths resolve to `null`.

use serde_json::Value;

use crate::domain::execution::WorkflowState;
use crate::error::EngineError;

/// Evaluates a step's boolean expression against execution state
pub trait ConditionEvaluator: Send + Sync {
    /// Evaluate the expression; any parse or type failure is an error, never
    /// silently `false`
    fn evaluate(&self, expression: &str, state: &WorkflowState) -> Result<bool, EngineError>;
}

/// Default evaluator backed by the restricted expression grammar
#[derive(Debug, Default)]
pub struct ExprConditionEvaluator;

impl ExprConditionEvaluator {
    /// Create a new evaluator
    pub fn new() -> Self {
        Self
    }
}

impl ConditionEvaluator for ExprConditionEvaluator {
    fn evaluate(&self, expression: &str, state: &WorkflowState) -> Result<bool, EngineError> {
        let ast = parse(expression)?;
        match eval(&ast, state)? {
            Value::Bool(b) => Ok(b),
            other => Err(EngineError::ConditionEvaluationError(format!(
                "expression '{}' evaluated to non-boolean {}",
                expression, other
            ))),
        }
    }
}

// ── Tokens ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Path(String),
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Not,
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn err(msg: impl Into<String>) -> EngineError {
    EngineError::ConditionEvaluationError(msg.into())
}

fn lex(input: &str) -> Result<Vec<Token>, EngineError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else {
                    return Err(err("single '=' is not an operator, use '=='"));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::NotEq);
                    i += 2;
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::AndAnd);
                    i += 2;
                } else {
                    return Err(err("single '&' is not an operator, use '&&'"));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::OrOr);
                    i += 2;
                } else {
                    return Err(err("single '|' is not an operator, use '||'"));
                }
            }
            '{' => {
                // {{dotted.path}} placeholder, resolved at evaluation time
                if chars.get(i + 1) != Some(&'{') {
                    return Err(err("unexpected '{'"));
                }
                let mut j = i + 2;
                let mut path = String::new();
                while j < chars.len() {
                    if chars[j] == '}' && chars.get(j + 1) == Some(&'}') {
                        break;
                    }
                    path.push(chars[j]);
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(err("unterminated '{{' placeholder"));
                }
                let path = path.trim();
                if path.is_empty() {
                    return Err(err("empty '{{}}' placeholder"));
                }
                tokens.push(Token::Path(path.to_string()));
                i = j + 2;
            }
            '\'' | '"' => {
                let quote = c;
                let mut j = i + 1;
                let mut s = String::new();
                while j < chars.len() && chars[j] != quote {
                    s.push(chars[j]);
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(err("unterminated string literal"));
                }
                tokens.push(Token::Str(s));
                i = j + 1;
            }
            c if c.is_ascii_digit() => {
                let mut j = i;
                while j < chars.len() && (chars[j].is_ascii_digit() || chars[j] == '.') {
                    j += 1;
                }
                let text: String = chars[i..j].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| err(format!("invalid number '{}'", text)))?;
                tokens.push(Token::Number(number));
                i = j;
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                let mut j = i;
                while j < chars.len()
                    && (chars[j].is_ascii_alphanumeric()
                        || chars[j] == '_'
                        || chars[j] == '$'
                        || chars[j] == '.')
                {
                    j += 1;
                }
                let word: String = chars[i..j].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::Bool(true),
                    "false" => Token::Bool(false),
                    "null" => Token::Null,
                    _ => Token::Path(word),
                });
                i = j;
            }
            other => return Err(err(format!("unexpected character '{}'", other))),
        }
    }

    Ok(tokens)
}

// ── AST ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Path(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

/// Parse an expression into the restricted AST
fn parse(input: &str) -> Result<Expr, EngineError> {
    let tokens = lex(input)?;
    if tokens.is_empty() {
        return Err(err("empty expression"));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(err(format!(
            "unexpected trailing token {:?}",
            parser.tokens[parser.pos]
        )));
    }
    Ok(expr)
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self) -> Result<Expr, EngineError> {
        let mut lhs = self.and_expr()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.and_expr()?;
            lhs = Expr::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, EngineError> {
        let mut lhs = self.equality()?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.equality()?;
            lhs = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, EngineError> {
        let mut lhs = self.comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::Ne,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.comparison()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr, EngineError> {
        let lhs = self.additive()?;
        let op = match self.peek() {
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.additive()?;
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn additive(&mut self) -> Result<Expr, EngineError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, EngineError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, EngineError> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.eat(&Token::Minus) {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, EngineError> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(Expr::Literal(
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Bool(b)) => Ok(Expr::Literal(Value::Bool(b))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::Path(p)) => Ok(Expr::Path(p)),
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                if !self.eat(&Token::RParen) {
                    return Err(err("missing closing parenthesis"));
                }
                Ok(inner)
            }
            Some(other) => Err(err(format!("unexpected token {:?}", other))),
            None => Err(err("unexpected end of expression")),
        }
    }
}

// ── Evaluation ───────────────────────────────────────────────────────

fn eval(expr: &Expr, state: &WorkflowState) -> Result<Value, EngineError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(path) => {
            let path = path.strip_prefix("state.").unwrap_or(path);
            Ok(state.get_path(path).cloned().unwrap_or(Value::Null))
        }
        Expr::Not(inner) => match eval(inner, state)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(err(format!("'!' applied to non-boolean {}", other))),
        },
        Expr::Neg(inner) => {
            let value = eval(inner, state)?;
            let n = as_number(&value)?;
            Ok(number(-n))
        }
        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, state),
    }
}

fn eval_binary(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    state: &WorkflowState,
) -> Result<Value, EngineError> {
    // boolean combinators short-circuit
    if matches!(op, BinaryOp::And | BinaryOp::Or) {
        let left = as_bool(&eval(lhs, state)?)?;
        return match (op, left) {
            (BinaryOp::And, false) => Ok(Value::Bool(false)),
            (BinaryOp::Or, true) => Ok(Value::Bool(true)),
            _ => Ok(Value::Bool(as_bool(&eval(rhs, state)?)?)),
        };
    }

    let left = eval(lhs, state)?;
    let right = eval(rhs, state)?;

    match op {
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(&left, &right))),
        BinaryOp::Ne => Ok(Value::Bool(!loose_eq(&left, &right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(&left, &right)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                BinaryOp::Ge => ordering.is_ge(),
                _ => unreachable!(),
            }))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            let a = as_number(&left)?;
            let b = as_number(&right)?;
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => {
                    if b == 0.0 {
                        return Err(err("division by zero"));
                    }
                    a / b
                }
                _ => unreachable!(),
            };
            Ok(number(result))
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn number(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn as_number(value: &Value) -> Result<f64, EngineError> {
    value
        .as_f64()
        .ok_or_else(|| err(format!("expected a number, got {}", value)))
}

fn as_bool(value: &Value) -> Result<bool, EngineError> {
    value
        .as_bool()
        .ok_or_else(|| err(format!("expected a boolean, got {}", value)))
}

/// Equality with numeric coercion so `2 == 2.0` holds
fn loose_eq(left: &Value, right: &Value) -> bool {
    if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
        return a == b;
    }
    left == right
}

fn compare(left: &Value, right: &Value) -> Result<std::cmp::Ordering, EngineError> {
    if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
        return a
            .partial_cmp(&b)
            .ok_or_else(|| err("numbers are not comparable"));
    }
    if let (Value::String(a), Value::String(b)) = (left, right) {
        return Ok(a.cmp(b));
    }
    Err(err(format!(
        "cannot order {} against {}",
        left, right
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> WorkflowState {
        let mut state = WorkflowState::default();
        state.set(
            "validation_result",
            json!({"amount": 2000, "status": "ok", "approved": true}),
        );
        state.set("retries", json!(2));
        state
    }

    fn eval_expr(expr: &str) -> Result<bool, EngineError> {
        ExprConditionEvaluator::new().evaluate(expr, &state())
    }

    #[test]
    fn test_numeric_comparisons() {
        assert!(eval_expr("validation_result.amount > 1000").unwrap());
        assert!(!eval_expr("validation_result.amount < 1000").unwrap());
        assert!(eval_expr("validation_result.amount >= 2000").unwrap());
        assert!(eval_expr("validation_result.amount <= 2000").unwrap());
        assert!(eval_expr("validation_result.amount == 2000").unwrap());
        assert!(eval_expr("validation_result.amount != 1999").unwrap());
    }

    #[test]
    fn test_placeholder_and_bare_paths_are_equivalent() {
        assert!(eval_expr("{{validation_result.amount}} > 1000").unwrap());
        assert!(eval_expr("{{ validation_result.amount }} == validation_result.amount").unwrap());
    }

    #[test]
    fn test_string_comparison() {
        assert!(eval_expr("validation_result.status == 'ok'").unwrap());
        assert!(eval_expr("validation_result.status != \"failed\"").unwrap());
        assert!(eval_expr("'abc' < 'abd'").unwrap());
    }

    #[test]
    fn test_boolean_combinators() {
        assert!(eval_expr("validation_result.approved && retries < 3").unwrap());
        assert!(eval_expr("false || validation_result.approved").unwrap());
        assert!(eval_expr("!(retries > 5)").unwrap());
    }

    #[test]
    fn test_short_circuit_skips_rhs_type_errors() {
        // rhs would fail with a type error, but the lhs decides
        assert!(!eval_expr("false && (1 + 'x' == 2)").unwrap());
        assert!(eval_expr("true || (1 + 'x' == 2)").unwrap());
    }

    #[test]
    fn test_arithmetic() {
        assert!(eval_expr("retries + 1 == 3").unwrap());
        assert!(eval_expr("validation_result.amount / 2 == 1000").unwrap());
        assert!(eval_expr("(retries + 1) * 2 >= 6").unwrap());
        assert!(eval_expr("-retries == 0 - 2").unwrap());
    }

    #[test]
    fn test_missing_path_resolves_to_null() {
        assert!(eval_expr("missing.path == null").unwrap());
        assert!(!eval_expr("missing.path == 5").unwrap());
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        assert!(matches!(
            eval_expr("validation_result.status > 5"),
            Err(EngineError::ConditionEvaluationError(_))
        ));
        assert!(matches!(
            eval_expr("retries && true"),
            Err(EngineError::ConditionEvaluationError(_))
        ));
        assert!(matches!(
            eval_expr("!retries"),
            Err(EngineError::ConditionEvaluationError(_))
        ));
    }

    #[test]
    fn test_non_boolean_result_is_an_error() {
        assert!(matches!(
            eval_expr("retries + 1"),
            Err(EngineError::ConditionEvaluationError(_))
        ));
    }

    #[test]
    fn test_parse_errors() {
        for expr in [
            "",
            "retries =",
            "retries == ",
            "(retries == 2",
            "retries & true",
            "{{unterminated",
            "'unterminated",
            "amount @ 5",
            "1 2",
        ] {
            assert!(
                matches!(
                    eval_expr(expr),
                    Err(EngineError::ConditionEvaluationError(_))
                ),
                "expected parse error for {:?}",
                expr
            );
        }
    }

    #[test]
    fn test_division_by_zero() {
        assert!(matches!(
            eval_expr("1 / 0 == 1"),
            Err(EngineError::ConditionEvaluationError(_))
        ));
    }
}
