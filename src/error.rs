//! Crate-wide error types.
//!
//! Each subsystem gets its own `thiserror` enum rather than one monolithic
//! error, matching spec.md §7's split between parse/validation errors
//! (human-readable, position-carrying) and the machine-readable kinds
//! returned at the Management API boundary.

use std::fmt;

/// A `(line, column)` position in rule source text, 1-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub const fn start() -> Self {
        Self { line: 1, column: 1 }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Lexing/parsing failures. Carries position and, where known, what was
/// expected — spec.md §4.1.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("{position}: {message}")]
pub struct ParseError {
    pub position: Position,
    pub message: String,
    pub expected: Vec<String>,
}

impl ParseError {
    pub fn new(position: Position, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
            expected: Vec::new(),
        }
    }

    pub fn expected(position: Position, message: impl Into<String>, expected: Vec<&str>) -> Self {
        Self {
            position,
            message: message.into(),
            expected: expected.into_iter().map(String::from).collect(),
        }
    }
}

/// Semantic-limit violations — spec.md §4.2. One variant per limit
/// category so collaborators can render a specific diagnostic.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("rule source is {actual} bytes, exceeding the {max} byte limit")]
    SourceTooLarge { actual: usize, max: usize },
    #[error("rule nests {actual} levels deep, exceeding the {max} level limit")]
    TooDeep { actual: usize, max: usize },
    #[error("rule has {actual} span checks, exceeding the {max} check limit")]
    TooManySpanChecks { actual: usize, max: usize },
    #[error("count(...) comparisons require a non-negative integer literal, got {found:?}")]
    CountNotNonNegativeInteger { found: String },
    #[error("invalid regular expression in 'matches' clause: {detail}")]
    InvalidRegex { detail: String },
    #[error("'in' list must be homogeneous, found mixed types")]
    HeterogeneousList,
}

/// Errors returned from the Management API / Engine facade — spec.md §7.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("no rule with id {0:?}")]
    RuleNotFound(String),
    #[error("no violation with id {0:?}")]
    ViolationNotFound(String),
    #[error("illegal transition in {fsm}: {from} -> {to}")]
    IllegalTransition {
        fsm: &'static str,
        from: String,
        to: String,
    },
    #[error("rule failed validation")]
    Invalid(Vec<ValidationError>),
    #[error("rule failed to parse")]
    Unparseable(Vec<ParseError>),
    #[error("shutdown in progress, operation canceled")]
    Canceled,
    #[error("internal error (debug token {token})")]
    Internal { token: String },
}

/// Returned from `Engine::accept_span` — spec.md §6 `acceptSpan(span) ->
/// {ok | TraceClosed | Rejected(reason)}`. `Rejected` always carries the
/// human-readable reason the contract calls for.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("trace is already closed")]
    TraceClosed,
    #[error("span rejected: {0}")]
    Rejected(String),
}

/// Fatal-for-this-record signing failure — spec.md §4.8.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("signing failed: {0}")]
pub struct SignatureError(pub String);
