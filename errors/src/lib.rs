//! # Exoscale Auth Errors
//!
//! Error taxonomy shared by every crate of the authentication backend.
//!
//! - Uses `thiserror` for structured error definitions with named fields
//! - Lower-level errors (storage, directory, policy) convert into
//!   [`AuthError`] through `From`
//! - [`AuthError::public_message`] is the only text a login client ever sees

use thiserror::Error;

/// Errors surfaced by the exposed backend operations.
///
/// `Display` keeps full detail for server-side logs. Clients receive
/// [`AuthError::public_message`] instead.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing {field}")]
    MissingField { field: String },

    #[error("invalid {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("invalid role")]
    InvalidRole,

    #[error("authentication failed: {reason}")]
    AuthFailed { reason: String },

    #[error("role {role} does not exist during renewal")]
    RenewalDenied { role: String },

    #[error("internal error: {reason}")]
    InternalError { reason: String },
}

impl AuthError {
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFieldValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self::AuthFailed {
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::InternalError {
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingField { .. } => "MISSING_FIELD",
            Self::InvalidFieldValue { .. } => "INVALID_FIELD_VALUE",
            Self::InvalidRole => "INVALID_ROLE",
            Self::AuthFailed { .. } => "PERMISSION_DENIED",
            Self::RenewalDenied { .. } => "RENEWAL_DENIED",
            Self::InternalError { .. } => "INTERNAL_ERROR",
        }
    }

    /// Message returned to the caller.
    ///
    /// Admin validation errors are specific. Login denials all collapse to
    /// the same text, and internal errors never leak their cause.
    pub fn public_message(&self) -> String {
        match self {
            Self::MissingField { .. } | Self::InvalidFieldValue { .. } => self.to_string(),
            Self::InvalidRole => "invalid role".to_string(),
            Self::AuthFailed { .. } => "authentication failed".to_string(),
            Self::RenewalDenied { role } => format!("role {role} does not exist during renewal"),
            Self::InternalError { .. } => "internal error".to_string(),
        }
    }

    pub fn is_denial(&self) -> bool {
        matches!(self, Self::InvalidRole | Self::AuthFailed { .. })
    }
}

/// Persistent key-value storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Connection to {backend} failed: {reason}")]
    ConnectionError { backend: String, reason: String },

    #[error("Query on {backend} failed: {reason}")]
    QueryError { backend: String, reason: String },

    #[error("Serialization failed for {key}: {reason}")]
    SerializationError { key: String, reason: String },

    #[error("Deserialization failed for {key}: {reason}")]
    DeserializationError { key: String, reason: String },
}

/// Errors returned by the remote compute directory.
///
/// `NotFound` is the only variant that may ever become an authorization
/// denial.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("{resource} {id} not found")]
    NotFound { resource: String, id: String },

    #[error("Transport failure: {reason}")]
    Transport { reason: String },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Malformed response: {reason}")]
    Decode { reason: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Directory client misconfigured: {reason}")]
    Configuration { reason: String },
}

impl DirectoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Policy compilation errors
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Invalid expression at {line}:{column}: {message}")]
    InvalidExpression {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Type error: {reason}")]
    TypeError { reason: String },
}

/// Runtime evaluation fault, distinct from a clean `false` verdict.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Evaluation failed: {reason}")]
pub struct EvalError {
    pub reason: String,
}

impl EvalError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<EvalError> for AuthError {
    fn from(err: EvalError) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<PolicyError> for AuthError {
    fn from(err: PolicyError) -> Self {
        Self::invalid("validator", err.to_string())
    }
}

impl From<DirectoryError> for AuthError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound { .. } => Self::denied(err.to_string()),
            other => Self::internal(other.to_string()),
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
