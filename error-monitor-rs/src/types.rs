//! # Core Types
//!
//! This module provides the shared data model for the error monitoring
//! subsystem: incoming log events, classifications, persisted dedup
//! records, and broker-owned admin notifications.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fingerprint::Fingerprint;

/// A type alias for Result with the error type defaulting to our MonitorError
pub type Result<T, E = MonitorError> = std::result::Result<T, E>;

/// Internal failure surface of the subsystem.
///
/// These never propagate to callers of `submit`/`notify`; they are caught
/// at the pipeline and broker boundaries, logged, and swallowed there.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Storage backend failure (lookup, insert, connection)
    #[error("storage error: {0}")]
    Storage(String),

    /// Wire or snapshot serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration could not be read or was invalid
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Subsystem startup failure
    #[error("initialization error: {0}")]
    Initialization(String),
}

impl From<sqlx::Error> for MonitorError {
    fn from(err: sqlx::Error) -> Self {
        MonitorError::Storage(err.to_string())
    }
}

/// Level of an incoming log event. Only warn and error reach this subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// The severity assigned to a classified failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// A failure that severely impacts functionality and needs attention now
    Critical,
    /// A significant issue that may impact some functionality
    Warning,
    /// Informational, not an actual incident
    Info,
}

impl Severity {
    /// Stable lowercase name, used in storage columns and the wire format
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => write!(f, "CRITICAL"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Info => write!(f, "INFO"),
        }
    }
}

impl FromStr for Severity {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "warning" => Ok(Severity::Warning),
            "info" => Ok(Severity::Info),
            other => Err(MonitorError::Storage(format!("unknown severity: {}", other))),
        }
    }
}

/// Closed set of failure categories.
///
/// The keyword taxonomy that feeds these lives in the classifier's rule
/// table; this enum is the stable vocabulary shared by the store, the
/// broker, and the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    ConnectionFailure,
    RateLimit,
    AuthFailure,
    ResourceExhaustion,
    DeploymentFailure,
    GenericApiError,
    Unknown,
}

impl ErrorCategory {
    /// Stable kebab-case name, used in cooldown keys and storage columns
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::ConnectionFailure => "connection-failure",
            ErrorCategory::RateLimit => "rate-limit",
            ErrorCategory::AuthFailure => "auth-failure",
            ErrorCategory::ResourceExhaustion => "resource-exhaustion",
            ErrorCategory::DeploymentFailure => "deployment-failure",
            ErrorCategory::GenericApiError => "generic-api-error",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// All categories, in classifier priority order
    pub fn all() -> &'static [ErrorCategory] {
        &[
            ErrorCategory::AuthFailure,
            ErrorCategory::RateLimit,
            ErrorCategory::ConnectionFailure,
            ErrorCategory::ResourceExhaustion,
            ErrorCategory::DeploymentFailure,
            ErrorCategory::GenericApiError,
            ErrorCategory::Unknown,
        ]
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "connection-failure" => Ok(ErrorCategory::ConnectionFailure),
            "rate-limit" => Ok(ErrorCategory::RateLimit),
            "auth-failure" => Ok(ErrorCategory::AuthFailure),
            "resource-exhaustion" => Ok(ErrorCategory::ResourceExhaustion),
            "deployment-failure" => Ok(ErrorCategory::DeploymentFailure),
            "generic-api-error" => Ok(ErrorCategory::GenericApiError),
            "unknown" => Ok(ErrorCategory::Unknown),
            other => Err(MonitorError::Storage(format!("unknown category: {}", other))),
        }
    }
}

/// Snapshot of an underlying cause attached to a log event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CauseInfo {
    /// Error type name as reported by the application
    pub name: String,
    /// Cause message
    pub message: String,
    /// Pre-rendered stack trace, if the application captured one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl CauseInfo {
    pub fn new<N: Into<String>, M: Into<String>>(name: N, message: M) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    pub fn stack<S: Into<String>>(mut self, stack: S) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// Transient input to the subsystem: one raw failure as raised by
/// application code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    /// The time when the failure occurred
    pub timestamp: DateTime<Utc>,
    /// warn or error
    pub level: LogLevel,
    /// Raw failure message
    pub message: String,
    /// The endpoint the failure originated from, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Free-form context as key-value pairs
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    /// Underlying cause, if the application attached one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<CauseInfo>,
}

impl LogEvent {
    /// Creates a new event stamped with the current time
    pub fn new<S: Into<String>>(level: LogLevel, message: S) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            endpoint: None,
            context: serde_json::Map::new(),
            cause: None,
        }
    }

    /// Overrides the event timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the originating endpoint
    pub fn endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Adds context information to the event
    pub fn context<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.context.insert(key.into(), value);
        }
        self
    }

    /// Attaches the underlying cause
    pub fn cause(mut self, cause: CauseInfo) -> Self {
        self.cause = Some(cause);
        self
    }
}

/// Deterministic classification of a failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub user_impact: String,
    pub suggested_action: String,
}

/// One persisted row per fingerprint-within-window.
///
/// Invariant: for a given fingerprint there is at most one record whose
/// `last_seen` falls inside the rolling dedup window; occurrences outside
/// the window start a fresh record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Storage-assigned id
    pub id: Uuid,
    /// Stable identity of the underlying failure
    pub fingerprint: Fingerprint,
    pub category: ErrorCategory,
    pub severity: Severity,
    /// Representative message (from the first occurrence)
    pub message: String,
    /// Context of the first occurrence
    #[serde(default)]
    pub context_snapshot: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause_snapshot: Option<CauseInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Number of merged occurrences, at least 1
    pub occurrence_count: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Audit timestamps
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ephemeral, broker-owned alert.
///
/// Exclusively owned by the broker; subscribers only ever receive
/// serialized copies. Wire representation is camelCase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminNotification {
    /// Opaque process-unique id
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
    pub user_impact: String,
    pub suggested_action: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub context: serde_json::Map<String, serde_json::Value>,
    pub acknowledged: bool,
}
