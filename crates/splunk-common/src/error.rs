//! Error types for the Splunk operator
//!
//! Errors are structured with fields to aid debugging in production. The
//! variants follow the reconciliation taxonomy: malformed specs, configuration
//! that needs an external fix, transient remote failures and invariant
//! violations that must never be auto-healed.

use std::time::Duration;

use thiserror::Error;

use crate::{REQUEUE_CONFIG_ERROR_SECS, REQUEUE_ERROR_SECS, REQUEUE_SUCCESS_SECS};

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Why a remote storage credential secret could not be used
///
/// Each condition fails independently; none of them produce a client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// The referenced secret does not exist
    #[error("secret not found")]
    SecretNotFound,
    /// The secret exists but carries no data
    #[error("secret has no data")]
    EmptySecret,
    /// The access key is present but the secret key is missing or empty
    #[error("secret key missing")]
    MissingSecretKey,
    /// The secret key is present but the access key is missing or empty
    #[error("access key missing")]
    MissingAccessKey,
}

/// Main error type for Splunk operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for CRD specs
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the descriptor with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.appRepo.appSources")
        field: Option<String>,
    },

    /// Configuration that can only be fixed externally
    #[error("configuration error for {resource}: {message}")]
    Configuration {
        /// Name of the app source, volume or descriptor involved
        resource: String,
        /// Description of what's missing
        message: String,
    },

    /// Remote storage credentials could not be resolved
    #[error("credential error for secret {secret}: {source}")]
    Credentials {
        /// Name of the credential secret
        secret: String,
        /// What was wrong with it
        #[source]
        source: CredentialError,
    },

    /// Network or listing failure against remote storage
    #[error("remote storage error [{provider}]: {message}")]
    TransientRemote {
        /// Provider identifier (aws, minio)
        provider: String,
        /// Description of what failed
        message: String,
    },

    /// An owned resource exists under a foreign controller
    #[error("invariant violated for {kind} {name}: {message}")]
    FatalInvariant {
        /// Kind of the conflicting object
        kind: String,
        /// Name of the conflicting object
        name: String,
        /// Description of the conflict
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// The operation was cancelled before it completed
    #[error("cancelled [{context}]")]
    Cancelled {
        /// What was cancelled (e.g., an app source name)
        context: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "store")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a configuration error for the given resource
    pub fn configuration(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a credential error for the given secret
    pub fn credentials(secret: impl Into<String>, source: CredentialError) -> Self {
        Self::Credentials {
            secret: secret.into(),
            source,
        }
    }

    /// Create a transient remote storage error
    pub fn remote(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::TransientRemote {
            provider: provider.into(),
            message: msg.into(),
        }
    }

    /// Create a fatal invariant error for an object
    pub fn invariant(
        kind: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::FatalInvariant {
            kind: kind.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(context: impl Into<String>) -> Self {
        Self::Cancelled {
            context: context.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, configuration and invariant errors need a human or another
    /// controller to act. Conflicts and throttling are the only 4xx responses
    /// worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) if ae.code == 409 || ae.code == 429 => true,
                kube::Error::Api(ae) => !(400..500).contains(&ae.code),
                _ => true,
            },
            Error::Validation { .. } => false,
            Error::Configuration { .. } => false,
            Error::Credentials { .. } => false,
            Error::TransientRemote { .. } => true,
            Error::FatalInvariant { .. } => false,
            Error::Serialization { .. } => false,
            Error::Cancelled { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// True for configuration and credential errors
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration { .. } | Error::Credentials { .. })
    }

    /// True if the descriptor should be reported in the Error phase
    ///
    /// Transient failures never escalate on a single occurrence.
    pub fn is_phase_error(&self) -> bool {
        matches!(
            self,
            Error::Validation { .. }
                | Error::Configuration { .. }
                | Error::Credentials { .. }
                | Error::FatalInvariant { .. }
        )
    }

    /// True if the error is a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }

    /// True if the error is a Kubernetes optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }

    /// How long the controller should wait before trying again
    ///
    /// `None` means wait for the descriptor to change.
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Error::Validation { .. } => None,
            Error::Configuration { .. } | Error::Credentials { .. } => {
                Some(Duration::from_secs(REQUEUE_CONFIG_ERROR_SECS))
            }
            Error::FatalInvariant { .. } => Some(Duration::from_secs(REQUEUE_SUCCESS_SECS)),
            Error::Serialization { .. } => None,
            _ => Some(Duration::from_secs(REQUEUE_ERROR_SECS)),
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            Error::Cancelled { context } => Some(context),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
