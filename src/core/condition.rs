//! Condition expressions gating job instances
//!
//! Expressions are parsed once into a [`Condition`] tree and evaluated
//! against the outcomes of a job's dependency instances plus the trigger
//! context. Evaluation is pure.
//!
//! ```text
//! or      := and ('||' and)*
//! and     := unary ('&&' unary)*
//! unary   := '!' unary | primary
//! primary := '(' or ')' | status | field (('==' | '!=') literal)?
//! status  := always | success | failure | cancelled   (optionally with "()")
//! field   := event | branch | is_pull_request | metadata.<key>
//! ```

use crate::core::{
    context::TriggerContext,
    error::ConditionEvaluationError,
    state::Outcome,
};
use std::fmt;

/// Parsed condition expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Run regardless of dependency outcomes
    Always,
    /// Every dependency instance succeeded
    Success,
    /// At least one dependency instance failed
    Failure,
    /// At least one dependency instance was cancelled
    Cancelled,
    /// Truthiness of a trigger context field
    Field(String),
    Equals { field: String, value: String },
    NotEquals { field: String, value: String },
    Not(Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

/// Result of checking a condition for one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    /// The instance must be skipped; `warning` is set when evaluation
    /// failed closed on missing context
    NotEligible {
        warning: Option<ConditionEvaluationError>,
    },
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

impl Default for Condition {
    fn default() -> Self {
        Condition::Success
    }
}

impl Condition {
    /// Parse a condition expression.
    ///
    /// An empty expression means `success()`. An expression that names no
    /// status function is wrapped as `success() && (expr)`.
    pub fn parse(source: &str) -> Result<Self, String> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Ok(Condition::Success);
        }

        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if let Some(tok) = parser.peek() {
            return Err(format!("unexpected token {}", tok));
        }

        if expr.uses_status() {
            Ok(expr)
        } else {
            Ok(Condition::And(Box::new(Condition::Success), Box::new(expr)))
        }
    }

    /// Whether any status function appears in the tree
    pub fn uses_status(&self) -> bool {
        match self {
            Condition::Always | Condition::Success | Condition::Failure | Condition::Cancelled => {
                true
            }
            Condition::Field(_) | Condition::Equals { .. } | Condition::NotEquals { .. } => false,
            Condition::Not(inner) => inner.uses_status(),
            Condition::And(l, r) | Condition::Or(l, r) => l.uses_status() || r.uses_status(),
        }
    }

    /// Evaluate against terminal dependency outcomes.
    ///
    /// Any non-terminal outcome in `dependencies` makes status checks
    /// false; callers only evaluate once every dependency is terminal.
    pub fn evaluate(
        &self,
        dependencies: &[Outcome],
        context: &TriggerContext,
    ) -> Result<bool, ConditionEvaluationError> {
        Ok(self.evaluate_partial(dependencies, context)?.unwrap_or(false))
    }

    /// Three-valued evaluation while some dependencies are still running.
    ///
    /// Returns `Some(false)` only when no future outcome of the pending
    /// dependencies can make the condition true.
    pub fn evaluate_partial(
        &self,
        dependencies: &[Outcome],
        context: &TriggerContext,
    ) -> Result<Option<bool>, ConditionEvaluationError> {
        let all_terminal = dependencies.iter().all(Outcome::is_terminal);

        let value = match self {
            Condition::Always => Some(true),
            Condition::Success => {
                if dependencies
                    .iter()
                    .any(|o| o.is_terminal() && *o != Outcome::Success)
                {
                    Some(false)
                } else if all_terminal {
                    Some(true)
                } else {
                    None
                }
            }
            Condition::Failure => any_outcome(dependencies, Outcome::Failure, all_terminal),
            Condition::Cancelled => any_outcome(dependencies, Outcome::Cancelled, all_terminal),
            Condition::Field(name) => Some(lookup(context, name)?.is_truthy()),
            Condition::Equals { field, value } => Some(lookup(context, field)?.equals(value)),
            Condition::NotEquals { field, value } => Some(!lookup(context, field)?.equals(value)),
            Condition::Not(inner) => inner.evaluate_partial(dependencies, context)?.map(|v| !v),
            Condition::And(l, r) => {
                // Both sides are evaluated so a missing field always fails closed
                let left = l.evaluate_partial(dependencies, context)?;
                let right = r.evaluate_partial(dependencies, context)?;
                match (left, right) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                }
            }
            Condition::Or(l, r) => {
                let left = l.evaluate_partial(dependencies, context)?;
                let right = r.evaluate_partial(dependencies, context)?;
                match (left, right) {
                    (Some(true), _) | (_, Some(true)) => Some(true),
                    (Some(false), Some(false)) => Some(false),
                    _ => None,
                }
            }
        };

        Ok(value)
    }

    /// Decide whether an instance may run, failing closed on missing context
    pub fn eligibility(&self, dependencies: &[Outcome], context: &TriggerContext) -> Eligibility {
        match self.evaluate(dependencies, context) {
            Ok(true) => Eligibility::Eligible,
            Ok(false) => Eligibility::NotEligible { warning: None },
            Err(e) => Eligibility::NotEligible { warning: Some(e) },
        }
    }
}

fn any_outcome(dependencies: &[Outcome], wanted: Outcome, all_terminal: bool) -> Option<bool> {
    if dependencies.contains(&wanted) {
        Some(true)
    } else if all_terminal {
        Some(false)
    } else {
        None
    }
}

fn lookup<'a>(
    context: &'a TriggerContext,
    name: &str,
) -> Result<crate::core::context::ContextValue<'a>, ConditionEvaluationError> {
    context
        .field(name)
        .ok_or_else(|| ConditionEvaluationError::MissingField(name.to_string()))
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Always => write!(f, "always()"),
            Condition::Success => write!(f, "success()"),
            Condition::Failure => write!(f, "failure()"),
            Condition::Cancelled => write!(f, "cancelled()"),
            Condition::Field(name) => write!(f, "{}", name),
            Condition::Equals { field, value } => write!(f, "{} == '{}'", field, value),
            Condition::NotEquals { field, value } => write!(f, "{} != '{}'", field, value),
            Condition::Not(inner) => write!(f, "!({})", inner),
            Condition::And(l, r) => write!(f, "({} && {})", l, r),
            Condition::Or(l, r) => write!(f, "({} || {})", l, r),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    Not,
    And,
    Or,
    Eq,
    Ne,
    Ident(String),
    Str(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::Not => write!(f, "'!'"),
            Token::And => write!(f, "'&&'"),
            Token::Or => write!(f, "'||'"),
            Token::Eq => write!(f, "'=='"),
            Token::Ne => write!(f, "'!='"),
            Token::Ident(s) => write!(f, "'{}'", s),
            Token::Str(s) => write!(f, "string '{}'", s),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&ch| ch == quote)
                    .map(|p| start + p)
                    .ok_or_else(|| format!("unterminated string starting at {}", i))?;
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            c if c.is_alphanumeric() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '.' | '-' | '/'))
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{}' at {}", other, i)),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Condition, String> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Condition, String> {
        let mut left = self.parse_unary()?;
        while self.eat(&Token::And) {
            let right = self.parse_unary()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Condition, String> {
        if self.eat(&Token::Not) {
            return Ok(Condition::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Condition, String> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                if !self.eat(&Token::RParen) {
                    return Err("expected ')'".to_string());
                }
                Ok(inner)
            }
            Some(Token::Ident(name)) => self.parse_ident(name),
            Some(tok) => Err(format!("unexpected token {}", tok)),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn parse_ident(&mut self, name: String) -> Result<Condition, String> {
        let status = match name.as_str() {
            "always" => Some(Condition::Always),
            "success" => Some(Condition::Success),
            "failure" => Some(Condition::Failure),
            "cancelled" => Some(Condition::Cancelled),
            _ => None,
        };

        if let Some(status) = status {
            if self.eat(&Token::LParen) && !self.eat(&Token::RParen) {
                return Err(format!("{}() takes no arguments", name));
            }
            return Ok(status);
        }

        if !is_known_field(&name) {
            return Err(format!("unknown context field '{}'", name));
        }

        let negated = match self.peek() {
            Some(Token::Eq) => false,
            Some(Token::Ne) => true,
            _ => return Ok(Condition::Field(name)),
        };
        self.pos += 1;

        let value = match self.next() {
            Some(Token::Str(s)) | Some(Token::Ident(s)) => s,
            Some(tok) => return Err(format!("expected a literal after comparison, got {}", tok)),
            None => return Err("expected a literal after comparison".to_string()),
        };

        Ok(if negated {
            Condition::NotEquals { field: name, value }
        } else {
            Condition::Equals { field: name, value }
        })
    }
}

fn is_known_field(name: &str) -> bool {
    matches!(name, "event" | "branch" | "is_pull_request")
        || name
            .strip_prefix("metadata.")
            .is_some_and(|key| !key.is_empty())
}
