use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Structured diagnostic context attached to an error (model id, release, stage, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext(BTreeMap<String, String>);

impl ErrorContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key/value pair, returning the extended context
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.0.insert(key.into(), value.to_string());
        self
    }

    /// Look up a value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn merge(&mut self, other: ErrorContext) {
        for (key, value) in other.0 {
            self.0.entry(key).or_insert(value);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.0 {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

/// Model mirror error types
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Policy or validation failure (oversized export, failed scans, malformed archive)
    #[error("{message}")]
    BadRequest {
        message: String,
        context: ErrorContext,
    },

    /// Authorization denied
    #[error("{message}")]
    Forbidden {
        message: String,
        context: ErrorContext,
    },

    /// Resource not found
    #[error("{message}")]
    NotFound {
        message: String,
        context: ErrorContext,
    },

    /// Unexpected failure, always carries a correlation id
    #[error("{message}")]
    Internal {
        message: String,
        context: ErrorContext,
        correlation_id: String,
    },

    /// Lifecycle method called out of order
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    Registry { registry: String, message: String },

    /// Several independent failures reported together
    #[error("{message}: {}", summarize(.errors))]
    Aggregate {
        message: String,
        errors: Vec<MirrorError>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

fn summarize(errors: &[MirrorError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl MirrorError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        MirrorError::BadRequest {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        MirrorError::Forbidden {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        MirrorError::NotFound {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create an internal error with a fresh correlation id.
    pub fn internal(message: impl Into<String>) -> Self {
        MirrorError::Internal {
            message: message.into(),
            context: ErrorContext::new(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Attach a context key/value. Variants without a context map are
    /// promoted to `Internal` so the context is not lost.
    pub fn with_context(self, key: impl Into<String>, value: impl ToString) -> Self {
        self.add_context(ErrorContext::new().with(key, value))
    }

    fn add_context(self, extra: ErrorContext) -> Self {
        if extra.is_empty() {
            return self;
        }
        match self {
            MirrorError::BadRequest { message, mut context } => {
                context.merge(extra);
                MirrorError::BadRequest { message, context }
            }
            MirrorError::Forbidden { message, mut context } => {
                context.merge(extra);
                MirrorError::Forbidden { message, context }
            }
            MirrorError::NotFound { message, mut context } => {
                context.merge(extra);
                MirrorError::NotFound { message, context }
            }
            MirrorError::Internal {
                message,
                mut context,
                correlation_id,
            } => {
                context.merge(extra);
                MirrorError::Internal {
                    message,
                    context,
                    correlation_id,
                }
            }
            MirrorError::Aggregate { message, errors } => MirrorError::Aggregate {
                message,
                errors: errors
                    .into_iter()
                    .map(|e| e.add_context(extra.clone()))
                    .collect(),
            },
            MirrorError::Precondition(message) => MirrorError::Precondition(message),
            other => {
                let message = other.to_string();
                MirrorError::Internal {
                    message,
                    context: extra,
                    correlation_id: uuid::Uuid::new_v4().to_string(),
                }
            }
        }
    }

    /// Re-wrap with operation context. The error class is preserved: a
    /// Forbidden stays Forbidden, anything unclassified becomes Internal.
    pub fn wrap(self, operation: impl fmt::Display, context: ErrorContext) -> Self {
        let prefix = |message: String| format!("{operation}: {message}");
        let wrapped = match self {
            MirrorError::BadRequest { message, context } => MirrorError::BadRequest {
                message: prefix(message),
                context,
            },
            MirrorError::Forbidden { message, context } => MirrorError::Forbidden {
                message: prefix(message),
                context,
            },
            MirrorError::NotFound { message, context } => MirrorError::NotFound {
                message: prefix(message),
                context,
            },
            MirrorError::Internal {
                message,
                context,
                correlation_id,
            } => MirrorError::Internal {
                message: prefix(message),
                context,
                correlation_id,
            },
            MirrorError::Aggregate { message, errors } => MirrorError::Aggregate {
                message: prefix(message),
                errors,
            },
            MirrorError::Precondition(message) => MirrorError::Precondition(message),
            other => MirrorError::internal(prefix(other.to_string())),
        };
        wrapped.add_context(context)
    }

    /// Collapse a list of per-item failures. A single failure is returned
    /// unchanged, several are reported together.
    pub fn aggregate(message: impl Into<String>, mut errors: Vec<MirrorError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(MirrorError::Aggregate {
                message: message.into(),
                errors,
            }),
        }
    }

    /// HTTP-equivalent status class.
    pub fn status_code(&self) -> u16 {
        match self {
            MirrorError::BadRequest { .. } => 400,
            MirrorError::Forbidden { .. } => 403,
            MirrorError::NotFound { .. } => 404,
            MirrorError::Aggregate { errors, .. } => {
                let mut codes = errors.iter().map(MirrorError::status_code);
                match codes.next() {
                    Some(first) if codes.all(|c| c == first) => first,
                    _ => 500,
                }
            }
            _ => 500,
        }
    }

    /// Structured context, when the variant carries one.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            MirrorError::BadRequest { context, .. }
            | MirrorError::Forbidden { context, .. }
            | MirrorError::NotFound { context, .. }
            | MirrorError::Internal { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Text safe to show to the end user. Internal detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            MirrorError::Internal { correlation_id, .. } => {
                format!("Internal Server Error (correlation id {correlation_id})")
            }
            other if other.status_code() < 500 => other.to_string(),
            _ => "Internal Server Error".to_string(),
        }
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(err: serde_json::Error) -> Self {
        MirrorError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for MirrorError {
    fn from(err: serde_yaml::Error) -> Self {
        MirrorError::Serialization(err.to_string())
    }
}

/// Result type alias for model mirror operations
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Re-wrap errors with operation context.
pub trait ResultExt<T> {
    fn wrap_err(self, operation: impl fmt::Display, context: ErrorContext) -> Result<T>;
}

impl<T, E: Into<MirrorError>> ResultExt<T> for std::result::Result<T, E> {
    fn wrap_err(self, operation: impl fmt::Display, context: ErrorContext) -> Result<T> {
        self.map_err(|e| e.into().wrap(operation, context))
    }
}
