//! Error types for the Strata orchestrator.
//!
//! This module provides the error hierarchy for every stage of a run:
//! document loading, descriptor validation, graph construction, provider
//! calls, state storage, and plan application.

use std::path::PathBuf;
use thiserror::Error;

/// Exit code for a run where every unit was applied or skipped.
pub const EXIT_SUCCESS: u8 = 0;

/// Exit code for a run where at least one unit failed or was blocked.
pub const EXIT_PARTIAL_FAILURE: u8 = 1;

/// Exit code for fatal errors (validation, cycles, unavailable state).
pub const EXIT_FATAL: u8 = 2;

/// The main error type for the Strata orchestrator.
#[derive(Debug, Error)]
pub enum StrataError {
    /// Configuration document errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Descriptor validation errors.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Dependency graph errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Resource provider errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// State store errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Plan application errors.
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration document errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// A required setting is missing.
    #[error("Missing setting: {name}")]
    MissingSetting {
        /// Name of the missing setting.
        name: String,
    },
}

/// Descriptor validation errors.
///
/// All of these are reported before any provider call is made.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A kind-specific required property is absent.
    #[error("Resource '{id}' ({kind}) is missing required property '{property}'")]
    MissingProperty {
        /// Descriptor id.
        id: String,
        /// Descriptor kind.
        kind: String,
        /// Name of the missing property.
        property: String,
    },

    /// A reference points at an id that is not in the document.
    #[error("Resource '{id}' references unknown resource '{reference}'")]
    DanglingReference {
        /// Descriptor id.
        id: String,
        /// The unresolved reference.
        reference: String,
    },

    /// A descriptor references itself.
    #[error("Resource '{id}' references itself")]
    SelfReference {
        /// Descriptor id.
        id: String,
    },

    /// Two descriptors share an id.
    #[error("Duplicate resource id: {id}")]
    DuplicateId {
        /// The duplicated id.
        id: String,
    },

    /// An id is empty or contains unsupported characters.
    #[error("Invalid resource id '{id}': must start with a letter and contain only letters, digits, '-' or '_'")]
    InvalidId {
        /// The invalid id.
        id: String,
    },

    /// A region name is empty or malformed.
    #[error("Invalid region '{region}' for resource '{id}'")]
    InvalidRegion {
        /// Descriptor id.
        id: String,
        /// The invalid region.
        region: String,
    },

    /// Descriptors of one stack target different regions.
    #[error("Stack '{stack}' spans regions '{first}' and '{second}'")]
    RegionMismatch {
        /// Stack name.
        stack: String,
        /// First region seen.
        first: String,
        /// Conflicting region.
        second: String,
    },

    /// The document account is empty.
    #[error("Account cannot be empty")]
    EmptyAccount,

    /// A property is present but its value is invalid.
    #[error("Resource '{id}' has invalid property '{property}': {message}")]
    InvalidProperty {
        /// Descriptor id.
        id: String,
        /// Property name.
        property: String,
        /// What is wrong with the value.
        message: String,
    },
}

/// Dependency graph errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    /// The reference graph contains a cycle.
    #[error("Dependency cycle detected: {}", cycle.join(" -> "))]
    CycleDetected {
        /// Ids along the cycle, first id repeated at the end.
        cycle: Vec<String>,
    },

    /// A unit id was looked up that the graph does not contain.
    #[error("Unknown deployment unit: {unit}")]
    UnknownUnit {
        /// The missing unit id.
        unit: String,
    },
}

/// Resource provider errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Network, timeout or throttling failure; safe to retry.
    #[error("Transient provider failure: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
    },

    /// Validation or permission failure; retrying will not help.
    #[error("Permanent provider failure: {message}")]
    Permanent {
        /// Description of the failure.
        message: String,
    },

    /// The provider does not implement the requested operation.
    #[error("Provider does not support {operation}")]
    Unsupported {
        /// Operation name.
        operation: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// The backing storage could not be read or written.
    #[error("State backend unavailable: {message}")]
    Unavailable {
        /// Description of the storage failure.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Plan application errors.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// A worker task ended abnormally.
    #[error("Worker for unit '{unit}' terminated abnormally: {message}")]
    WorkerPanicked {
        /// Unit the worker was applying.
        unit: String,
        /// Join error description.
        message: String,
    },

    /// The run was aborted before completion.
    #[error("Apply aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Result type alias for Strata operations.
pub type Result<T> = std::result::Result<T, StrataError>;

impl StrataError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the process exit code for this error.
    ///
    /// Every error that reaches the top level is fatal; partial failures
    /// are reported through the apply report instead.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        EXIT_FATAL
    }

    /// Returns true if this error was raised before any side effect.
    #[must_use]
    pub const fn is_pre_apply(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Validation(_) | Self::Graph(_))
    }
}

impl ValidationError {
    /// Creates an invalid-property error.
    #[must_use]
    pub fn invalid_property(
        id: impl Into<String>,
        property: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidProperty {
            id: id.into(),
            property: property.into(),
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a permanent error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Creates an unsupported-operation error.
    #[must_use]
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Returns true if the failure may succeed on retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

impl StateError {
    /// Creates a backend-unavailable error with the given message.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}
