//! Error handling for Warrant.
//!
//! This module provides:
//! - The typed failure taxonomy raised by resolvers, capabilities and the gate
//! - Stable machine-readable error codes with HTTP status mapping
//! - Severity-aware logging with tracing integration
//! - An `axum` response body so host middleware can translate gate failures
//!
//! # Usage
//!
//! ```rust,ignore
//! use warrant_core::error::{ErrorCode, WarrantError};
//!
//! match user.permissions(&authz).has_permission_to("posts.edit", entity).await {
//!     Err(err) if err.code() == ErrorCode::PermissionNotFound => { /* ... */ }
//!     other => { /* ... */ }
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

use crate::rbac::models::EntityId;

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Warrant operations.
pub type Result<T> = std::result::Result<T, WarrantError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Lookup key
// ═══════════════════════════════════════════════════════════════════════════════

/// The key a failed role/permission lookup was made with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum Lookup {
    Name(String),
    Id(u64),
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "named `{}`", name),
            Self::Id(id) => write!(f, "with id `{}`", id),
        }
    }
}

/// What kind of requirement the gate was evaluating when it denied access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementKind {
    Permissions,
    Roles,
    RolesOrPermissions,
}

impl fmt::Display for RequirementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permissions => f.write_str("permissions"),
            Self::Roles => f.write_str("roles"),
            Self::RolesOrPermissions => f.write_str("roles or permissions"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Lookup Errors (1000-1099)
    PermissionNotFound,
    RoleNotFound,
    EntityNotFound,

    // Conflict Errors (1100-1199)
    PermissionAlreadyExists,
    RoleAlreadyExists,

    // Validation Errors (1200-1299)
    MalformedWildcard,

    // Authorization (4000-4099)
    Unauthorized,
    NotLoggedIn,

    // Storage Errors (2000-2099)
    StorageError,

    // Configuration Errors (5000-5099)
    ConfigurationError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::PermissionNotFound => 1000,
            Self::RoleNotFound => 1001,
            Self::EntityNotFound => 1002,

            Self::PermissionAlreadyExists => 1100,
            Self::RoleAlreadyExists => 1101,

            Self::MalformedWildcard => 1200,

            Self::StorageError => 2000,

            Self::Unauthorized => 4000,
            Self::NotLoggedIn => 4001,

            Self::ConfigurationError => 5000,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::PermissionNotFound | Self::RoleNotFound | Self::EntityNotFound => {
                StatusCode::NOT_FOUND
            }

            Self::PermissionAlreadyExists | Self::RoleAlreadyExists => StatusCode::CONFLICT,

            Self::MalformedWildcard => StatusCode::UNPROCESSABLE_ENTITY,

            // Guests are forbidden, not challenged.
            Self::Unauthorized | Self::NotLoggedIn => StatusCode::FORBIDDEN,

            Self::StorageError | Self::ConfigurationError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "lookup",
            1100..=1199 => "conflict",
            1200..=1299 => "validation",
            2000..=2099 => "storage",
            4000..=4099 => "authorization",
            5000..=5099 => "configuration",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (unknown names, denied requests)
    Low,
    /// Misuse that usually points at a bug in the caller
    Medium,
    /// Storage or configuration failures
    High,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::PermissionNotFound
            | ErrorCode::RoleNotFound
            | ErrorCode::EntityNotFound
            | ErrorCode::Unauthorized
            | ErrorCode::NotLoggedIn => Self::Low,

            ErrorCode::PermissionAlreadyExists
            | ErrorCode::RoleAlreadyExists
            | ErrorCode::MalformedWildcard => Self::Medium,

            ErrorCode::StorageError | ErrorCode::ConfigurationError => Self::High,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Warrant.
#[derive(Debug, Error)]
pub enum WarrantError {
    #[error("There is no permission {0}")]
    PermissionNotFound(Lookup),

    #[error("There is no role {0}")]
    RoleNotFound(Lookup),

    #[error("A permission `{0}` already exists")]
    PermissionAlreadyExists(String),

    #[error("A role `{0}` already exists")]
    RoleAlreadyExists(String),

    #[error("Entity with id {0} does not exist")]
    EntityNotFound(EntityId),

    #[error("Wildcard permission `{0}` is not properly formatted")]
    MalformedWildcard(String),

    #[error("User does not have the right {kind}: {}", .requested.join(", "))]
    Unauthorized {
        kind: RequirementKind,
        requested: Vec<String>,
    },

    #[error("User is not logged in")]
    NotLoggedIn,

    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl WarrantError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a storage error from a message.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create a storage error wrapping the collaborator's own error.
    pub fn storage_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an unauthorized error for the given requested names.
    pub fn unauthorized<I, S>(kind: RequirementKind, requested: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Unauthorized {
            kind,
            requested: requested.into_iter().map(Into::into).collect(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::PermissionNotFound(_) => ErrorCode::PermissionNotFound,
            Self::RoleNotFound(_) => ErrorCode::RoleNotFound,
            Self::PermissionAlreadyExists(_) => ErrorCode::PermissionAlreadyExists,
            Self::RoleAlreadyExists(_) => ErrorCode::RoleAlreadyExists,
            Self::EntityNotFound(_) => ErrorCode::EntityNotFound,
            Self::MalformedWildcard(_) => ErrorCode::MalformedWildcard,
            Self::Unauthorized { .. } => ErrorCode::Unauthorized,
            Self::NotLoggedIn => ErrorCode::NotLoggedIn,
            Self::Storage { .. } => ErrorCode::StorageError,
            Self::Configuration(_) => ErrorCode::ConfigurationError,
        }
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> StatusCode {
        self.code().http_status()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code())
    }

    /// The role/permission names the gate was asked for, if this is a denial.
    pub fn requested(&self) -> Option<&[String]> {
        match self {
            Self::Unauthorized { requested, .. } => Some(requested),
            _ => None,
        }
    }

    /// Whether this is a role or permission lookup failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::PermissionNotFound(_) | Self::RoleNotFound(_))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code();
        let status = code.http_status().as_u16();

        match self.severity() {
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = code.category(),
                    http_status = status,
                    error = %self,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = code.category(),
                    http_status = status,
                    error = %self,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = code.category(),
                    http_status = status,
                    error = %self,
                    "Low severity error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    /// Record an error counter for this failure and hand it back.
    pub(crate) fn recorded(self) -> Self {
        let code = self.code();
        counter!(
            "warrant_errors_total",
            "code" => code.to_string(),
            "category" => code.category().to_string(),
        )
        .increment(1);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response body for host middleware.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Whether the request was successful (always false for errors)
    pub success: bool,

    /// Error information
    pub error: ErrorInfo,
}

/// Detailed error information for API responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Numeric error code
    pub numeric_code: u32,

    /// Human readable message
    pub message: String,

    /// The role/permission names that were required
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&WarrantError> for ErrorResponse {
    fn from(error: &WarrantError) -> Self {
        let code = error.code();
        // Storage failures can carry connection details; keep them out of bodies.
        let message = match error {
            WarrantError::Storage { .. } => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        Self {
            success: false,
            error: ErrorInfo {
                code,
                numeric_code: code.numeric_code(),
                message,
                required: error.requested().map(<[String]>::to_vec).unwrap_or_default(),
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

impl IntoResponse for WarrantError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<config::ConfigError> for WarrantError {
    fn from(error: config::ConfigError) -> Self {
        Self::Configuration(error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
