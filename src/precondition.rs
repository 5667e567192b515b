//! Boolean precondition expressions over runtime robot variables.
//!
//! Grammar:
//!
//! ```text
//! expr    := and ("||" and)*
//! and     := unary ("&&" unary)*
//! unary   := "!" unary | compare
//! compare := atom (("==" | "!=" | "<" | "<=" | ">" | ">=") atom)?
//! atom    := "(" expr ")" | true | false | number | 'text' | "text" | path
//! ```
//!
//! A path such as `robot.homed` resolves against [`RobotState`]; an unset
//! variable evaluates to null, which is falsy and equal only to itself.

use serde_json::Value;

use crate::deck::RobotState;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(String),
    Number(f64),
    Text(String),
    Bool(bool),
    Op(&'static str),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '\'' | '"' => {
                let close = input[i + 1..]
                    .find(c)
                    .ok_or_else(|| format!("unterminated string at {i}"))?;
                tokens.push(Token::Text(input[i + 1..i + 1 + close].to_string()));
                i += close + 2;
            }
            _ => {
                // Two-character operators first.
                if let Some(op) = ["==", "!=", "<=", ">=", "&&", "||"]
                    .into_iter()
                    .find(|op| input[i..].starts_with(op))
                {
                    tokens.push(Token::Op(op));
                    i += 2;
                } else if let Some(op) = ["<", ">", "!"].into_iter().find(|op| input[i..].starts_with(op)) {
                    tokens.push(Token::Op(op));
                    i += 1;
                } else if c.is_ascii_digit() || c == '-' || c == '.' {
                    let end = input[i + 1..]
                        .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
                        .map_or(bytes.len(), |n| i + 1 + n);
                    let number = input[i..end]
                        .parse()
                        .map_err(|_| format!("invalid number `{}`", &input[i..end]))?;
                    tokens.push(Token::Number(number));
                    i = end;
                } else if c.is_ascii_alphabetic() || c == '_' {
                    let end = input[i..]
                        .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_' || ch == '.'))
                        .map_or(bytes.len(), |n| i + n);
                    let word = &input[i..end];
                    tokens.push(match word {
                        "true" => Token::Bool(true),
                        "false" => Token::Bool(false),
                        _ => Token::Path(word.to_string()),
                    });
                    i = end;
                } else {
                    return Err(format!("unexpected character `{c}`"));
                }
            }
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    state: &'a RobotState,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<Value, String> {
        let first = self.and()?;
        if !matches!(self.peek(), Some(Token::Op("||"))) {
            return Ok(first);
        }
        let mut value = truthy(&first);
        while self.eat_op("||") {
            let rhs = truthy(&self.and()?);
            value = value || rhs;
        }
        Ok(Value::Bool(value))
    }

    fn and(&mut self) -> Result<Value, String> {
        let first = self.unary()?;
        if !matches!(self.peek(), Some(Token::Op("&&"))) {
            return Ok(first);
        }
        let mut value = truthy(&first);
        while self.eat_op("&&") {
            let rhs = truthy(&self.unary()?);
            value = value && rhs;
        }
        Ok(Value::Bool(value))
    }

    fn unary(&mut self) -> Result<Value, String> {
        if self.eat_op("!") {
            return Ok(Value::Bool(!truthy(&self.unary()?)));
        }
        self.compare()
    }

    fn compare(&mut self) -> Result<Value, String> {
        let lhs = self.atom()?;
        let op = match self.peek() {
            Some(Token::Op(op)) if matches!(*op, "==" | "!=" | "<" | "<=" | ">" | ">=") => *op,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.atom()?;
        let result = match op {
            "==" => lhs == rhs,
            "!=" => lhs != rhs,
            _ => match (lhs.as_f64(), rhs.as_f64()) {
                (Some(a), Some(b)) => match op {
                    "<" => a < b,
                    "<=" => a <= b,
                    ">" => a > b,
                    _ => a >= b,
                },
                _ => false,
            },
        };
        Ok(Value::Bool(result))
    }

    fn atom(&mut self) -> Result<Value, String> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| "unexpected end of expression".to_string())?;
        self.pos += 1;
        match token {
            Token::LParen => {
                let value = self.expr()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err("missing `)`".to_string());
                }
                self.pos += 1;
                Ok(value)
            }
            Token::Bool(b) => Ok(Value::Bool(b)),
            Token::Text(s) => Ok(Value::String(s)),
            Token::Number(n) => Ok(serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)),
            Token::Path(path) => Ok(self.state.get(&path).map_or(Value::Null, normalize)),
            other => Err(format!("unexpected token {other:?}")),
        }
    }
}

// Integers and floats compare by value, so `1 == 1.0`.
fn normalize(value: &Value) -> Value {
    match value.as_f64() {
        Some(n) if value.is_number() => {
            serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
        }
        _ => value.clone(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Evaluate `expression` against `state`. `Err` carries a parse error.
pub fn evaluate(expression: &str, state: &RobotState) -> Result<bool, String> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        state,
    };
    let value = parser.expr()?;
    if let Some(extra) = parser.peek() {
        return Err(format!("unexpected trailing token {extra:?}"));
    }
    Ok(truthy(&value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> RobotState {
        RobotState::default()
            .with("robot.homed", true)
            .with("tip.attached", false)
            .with("tip.volume", 120)
            .with("deck.mode", "run")
    }

    #[test]
    fn equality_against_literals() {
        let s = state();
        assert_eq!(evaluate("robot.homed == true", &s), Ok(true));
        assert_eq!(evaluate("tip.attached == true", &s), Ok(false));
        assert_eq!(evaluate("deck.mode == 'run'", &s), Ok(true));
        assert_eq!(evaluate("deck.mode != \"idle\"", &s), Ok(true));
        assert_eq!(evaluate("tip.volume == 120.0", &s), Ok(true));
    }

    #[test]
    fn numeric_comparisons() {
        let s = state();
        assert_eq!(evaluate("tip.volume >= 50", &s), Ok(true));
        assert_eq!(evaluate("tip.volume < 100.5", &s), Ok(false));
        assert_eq!(evaluate("tip.volume > -1", &s), Ok(true));
        assert_eq!(evaluate("deck.mode > 1", &s), Ok(false));
    }

    #[test]
    fn boolean_connectives_and_grouping() {
        let s = state();
        assert_eq!(evaluate("robot.homed && !tip.attached", &s), Ok(true));
        assert_eq!(evaluate("tip.attached || robot.homed", &s), Ok(true));
        assert_eq!(evaluate("!(robot.homed && tip.volume > 500)", &s), Ok(true));
        assert_eq!(evaluate("robot.homed && (tip.attached || tip.volume < 10)", &s), Ok(false));
    }

    #[test]
    fn parenthesised_operands_keep_their_value() {
        let s = state();
        assert_eq!(evaluate("(tip.volume) >= 50", &s), Ok(true));
        assert_eq!(evaluate("(tip.volume) == 120", &s), Ok(true));
        assert_eq!(evaluate("(deck.mode) == 'run'", &s), Ok(true));
        assert_eq!(evaluate("((tip.volume)) < 100", &s), Ok(false));
        assert_eq!(evaluate("(robot.homed || tip.attached) == true", &s), Ok(true));
    }

    #[test]
    fn unset_variables_are_falsy() {
        let s = RobotState::default();
        assert_eq!(evaluate("robot.homed", &s), Ok(false));
        assert_eq!(evaluate("robot.homed == true", &s), Ok(false));
        assert_eq!(evaluate("!robot.error", &s), Ok(true));
    }

    #[test]
    fn malformed_expressions_are_errors() {
        let s = state();
        for expr in ["", "robot.homed ==", "(robot.homed", "robot.homed true", "'open", "robot.homed # 1"] {
            assert!(evaluate(expr, &s).is_err(), "{expr}");
        }
    }
}
