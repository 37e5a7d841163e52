//! Engine error taxonomy.
//!
//! One closed enum for every error kind named in the spec's error table. Kept
//! as a hand-written `Display`/`Error` impl rather than a derive macro, the
//! same way the wire-protocol errors elsewhere in this style of codebase are
//! done, since every variant here carries fields the RPC facade needs
//! untouched for the error envelope (code, message, details).

use std::fmt;

/// A single field-level validation failure, aggregated rather than raised
/// immediately so callers can surface every problem in one response.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    pub rule_index: Option<usize>,
    pub field: Option<String>,
    pub message: String,
}

impl FieldError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            rule_index: None,
            field: None,
            message: message.into(),
        }
    }

    pub fn on_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule_index: None,
            field: Some(field.into()),
            message: message.into(),
        }
    }

    pub fn on_rule(rule_index: usize, message: impl Into<String>) -> Self {
        Self {
            rule_index: Some(rule_index),
            field: None,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum EngineError {
    /// Request-shape problems: missing/invalid fields.
    ValidationError { errors: Vec<FieldError> },
    NotFound { kind: &'static str, id: String },
    /// Catch-all domain/business rule violation that isn't one of the more
    /// specific variants below.
    BusinessLogicError { message: String },
    FileUploadError { reason: String },
    ParserError {
        format: &'static str,
        offset: Option<u64>,
        reason: String,
    },
    LifecycleViolation {
        from: String,
        to: String,
        reason: String,
    },
    CompileError { reasons: Vec<FieldError> },
    Timeout { operation: &'static str, limit_ms: u64 },
    Cancelled,
    PayloadTooLarge { limit_bytes: u64, actual_bytes: u64 },
    TooManyDies { limit: usize, actual: usize },
    UnknownPlugin { kind: &'static str, name: String },
    NoEligibleRules,
    EmptyWafer,
    ToolConstraintInfeasible { reason: String },
    /// Should-never-happen / transient-internal bucket. Logged with context
    /// upstream; never leaks internals to the caller beyond `message`.
    Internal { message: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationError { errors } => {
                write!(f, "validation error: {} field(s) failed", errors.len())
            }
            Self::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            Self::BusinessLogicError { message } => write!(f, "{message}"),
            Self::FileUploadError { reason } => write!(f, "file upload error: {reason}"),
            Self::ParserError {
                format, offset, reason,
            } => match offset {
                Some(off) => write!(f, "{format} parse error at offset {off}: {reason}"),
                None => write!(f, "{format} parse error: {reason}"),
            },
            Self::LifecycleViolation { from, to, reason } => {
                write!(f, "cannot transition {from} -> {to}: {reason}")
            }
            Self::CompileError { reasons } => {
                write!(f, "compile error: {} issue(s)", reasons.len())
            }
            Self::Timeout { operation, limit_ms } => {
                write!(f, "{operation} exceeded {limit_ms}ms timeout")
            }
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::PayloadTooLarge { limit_bytes, actual_bytes } => write!(
                f,
                "payload too large: {actual_bytes} bytes exceeds limit of {limit_bytes} bytes"
            ),
            Self::TooManyDies { limit, actual } => {
                write!(f, "too many dies: {actual} exceeds limit of {limit}")
            }
            Self::UnknownPlugin { kind, name } => write!(f, "unknown {kind} plugin: {name}"),
            Self::NoEligibleRules => write!(f, "no eligible rules"),
            Self::EmptyWafer => write!(f, "wafer map is empty"),
            Self::ToolConstraintInfeasible { reason } => {
                write!(f, "tool constraint infeasible: {reason}")
            }
            Self::Internal { message } => write!(f, "internal error: {message}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    /// Stable error code for the wire error envelope (spec.md 6.4).
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationError { .. } => "validationError",
            Self::NotFound { .. } => "notFound",
            Self::BusinessLogicError { .. } => "businessLogicError",
            Self::FileUploadError { .. } => "fileUploadError",
            Self::ParserError { .. } => "parserError",
            Self::LifecycleViolation { .. } => "lifecycleViolation",
            Self::CompileError { .. } => "compileError",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::PayloadTooLarge { .. } => "payloadTooLarge",
            Self::TooManyDies { .. } => "tooManyDies",
            Self::UnknownPlugin { .. } => "unknownPlugin",
            Self::NoEligibleRules => "noEligibleRules",
            Self::EmptyWafer => "emptyWafer",
            Self::ToolConstraintInfeasible { .. } => "toolConstraintInfeasible",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Converts I/O / anyhow-layer failures into the `Internal` bucket at the
/// engine/facade boundary, per spec.md 7's propagation policy (no rewrapping
/// of already-typed codes).
impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
