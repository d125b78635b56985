//! Calculator tool — evaluates arithmetic expressions.
//!
//! Operators `+ - * / % ^` with the usual precedence (`^` binds tightest and
//! is right-associative), unary minus, parentheses, the constants `pi` and
//! `e`, and the functions `sqrt abs floor ceil round ln min max`.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::iter::Peekable;
use std::str::Chars;
use thiserror::Error;

use stepwise_core::error::ToolError;
use stepwise_core::tool::Tool;

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression. Supports + - * / % ^, parentheses, pi, e, \
         and sqrt/abs/floor/ceil/round/ln/min/max."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The expression to evaluate, e.g. 'sqrt(16) + 2^3'"
                }
            },
            "required": ["expression"]
        })
    }

    async fn invoke(&self, arguments: Value) -> Result<Value, ToolError> {
        let expression = arguments["expression"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("'expression' must be a string".into()))?;

        let result = evaluate(expression).map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.name().to_string(),
            reason: e.to_string(),
        })?;

        Ok(json!({ "expression": expression, "result": result }))
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalcError {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("unknown name '{0}'")]
    UnknownName(String),

    #[error("expected {expected}, found {found}")]
    Expected { expected: &'static str, found: String },

    #[error("{name} takes {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: &'static str,
        got: usize,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("result is not a finite number")]
    NotFinite,
}

/// Evaluate `expression` to a finite number.
pub fn evaluate(expression: &str) -> Result<f64, CalcError> {
    let mut parser = Parser::new(expression)?;
    let value = parser.expression(0)?;
    match parser.current {
        Token::End => {}
        ref other => {
            return Err(CalcError::Expected {
                expected: "end of expression",
                found: other.describe(),
            });
        }
    }
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CalcError::NotFinite)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    Open,
    Close,
    Comma,
    End,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => n.to_string(),
            Token::Ident(name) => format!("'{name}'"),
            Token::Op(c) => format!("'{c}'"),
            Token::Open => "'('".into(),
            Token::Close => "')'".into(),
            Token::Comma => "','".into(),
            Token::End => "end of expression".into(),
        }
    }

    /// An infix operator with its (left, right) binding power.
    fn infix(&self) -> Option<(char, u8, u8)> {
        match *self {
            Token::Op(op @ ('+' | '-')) => Some((op, 1, 2)),
            Token::Op(op @ ('*' | '/' | '%')) => Some((op, 3, 4)),
            Token::Op('^') => Some(('^', 7, 6)),
            _ => None,
        }
    }
}

const PREFIX_POWER: u8 = 5;

struct Parser<'a> {
    chars: Peekable<Chars<'a>>,
    current: Token,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Result<Self, CalcError> {
        let mut parser = Self {
            chars: input.chars().peekable(),
            current: Token::End,
        };
        parser.advance()?;
        Ok(parser)
    }

    /// Move to the next token, returning the one just consumed.
    fn advance(&mut self) -> Result<Token, CalcError> {
        let next = self.lex()?;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn lex(&mut self) -> Result<Token, CalcError> {
        while self.chars.next_if(|c| c.is_whitespace()).is_some() {}

        let Some(&c) = self.chars.peek() else {
            return Ok(Token::End);
        };
        if c.is_ascii_digit() || c == '.' {
            let mut literal = String::new();
            while let Some(d) = self.chars.next_if(|d| d.is_ascii_digit() || *d == '.') {
                literal.push(d);
            }
            return literal
                .parse()
                .map(Token::Number)
                .map_err(|_| CalcError::InvalidNumber(literal));
        }
        if c.is_ascii_alphabetic() {
            let mut name = String::new();
            while let Some(d) = self.chars.next_if(|d| d.is_ascii_alphanumeric()) {
                name.push(d);
            }
            return Ok(Token::Ident(name.to_ascii_lowercase()));
        }

        self.chars.next();
        match c {
            '+' | '-' | '*' | '/' | '%' | '^' => Ok(Token::Op(c)),
            '(' => Ok(Token::Open),
            ')' => Ok(Token::Close),
            ',' => Ok(Token::Comma),
            other => Err(CalcError::UnexpectedChar(other)),
        }
    }

    fn expect(&mut self, token: Token, expected: &'static str) -> Result<(), CalcError> {
        if self.current == token {
            self.advance()?;
            Ok(())
        } else {
            Err(CalcError::Expected {
                expected,
                found: self.current.describe(),
            })
        }
    }

    fn expression(&mut self, min_power: u8) -> Result<f64, CalcError> {
        let mut lhs = self.prefix()?;

        while let Some((op, left, right)) = self.current.infix() {
            if left < min_power {
                break;
            }
            self.advance()?;
            let rhs = self.expression(right)?;
            lhs = apply(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<f64, CalcError> {
        match self.advance()? {
            Token::Number(n) => Ok(n),
            Token::Op('-') => Ok(-self.expression(PREFIX_POWER)?),
            Token::Op('+') => self.expression(PREFIX_POWER),
            Token::Open => {
                let value = self.expression(0)?;
                self.expect(Token::Close, "')'")?;
                Ok(value)
            }
            Token::Ident(name) => self.name(name),
            other => Err(CalcError::Expected {
                expected: "a number",
                found: other.describe(),
            }),
        }
    }

    fn name(&mut self, name: String) -> Result<f64, CalcError> {
        match name.as_str() {
            "pi" => return Ok(std::f64::consts::PI),
            "e" => return Ok(std::f64::consts::E),
            _ => {}
        }

        self.expect(Token::Open, "'(' after function name")?;
        let mut args = vec![self.expression(0)?];
        while self.current == Token::Comma {
            self.advance()?;
            args.push(self.expression(0)?);
        }
        self.expect(Token::Close, "')'")?;
        call(&name, &args)
    }
}

fn apply(op: char, lhs: f64, rhs: f64) -> Result<f64, CalcError> {
    Ok(match op {
        '+' => lhs + rhs,
        '-' => lhs - rhs,
        '*' => lhs * rhs,
        '/' | '%' if rhs == 0.0 => return Err(CalcError::DivisionByZero),
        '/' => lhs / rhs,
        '%' => lhs % rhs,
        '^' => lhs.powf(rhs),
        other => return Err(CalcError::UnexpectedChar(other)),
    })
}

fn call(name: &str, args: &[f64]) -> Result<f64, CalcError> {
    let unary = |f: fn(f64) -> f64| match args {
        [x] => Ok(f(*x)),
        _ => Err(CalcError::Arity {
            name: name.to_string(),
            expected: "1",
            got: args.len(),
        }),
    };
    let variadic = |f: fn(f64, f64) -> f64| match args {
        [first, rest @ ..] if !rest.is_empty() => Ok(rest.iter().copied().fold(*first, f)),
        _ => Err(CalcError::Arity {
            name: name.to_string(),
            expected: "at least 2",
            got: args.len(),
        }),
    };

    match name {
        "sqrt" => unary(f64::sqrt),
        "abs" => unary(f64::abs),
        "floor" => unary(f64::floor),
        "ceil" => unary(f64::ceil),
        "round" => unary(f64::round),
        "ln" => unary(f64::ln),
        "min" => variadic(f64::min),
        "max" => variadic(f64::max),
        other => Err(CalcError::UnknownName(other.to_string())),
    }
}
