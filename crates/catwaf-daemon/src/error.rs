//! Control-plane error taxonomy.

use catwaf_core::db::DatabaseError;
use catwaf_crypto::CertError;

use crate::artifacts::ArtifactError;
use crate::gateway::GatewayError;

/// Errors surfaced by the coordinators.
///
/// Partial fleet failures are not errors; they are reported through
/// [`crate::regen::RegenerationReport`].
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Malformed or missing input. Nothing was mutated.
    #[error("{0}")]
    Validation(String),

    /// The target record does not exist. Nothing was mutated.
    #[error("{0} not found")]
    NotFound(String),

    /// An external executable failed or could not be run.
    #[error("{message}")]
    ExternalProcess {
        message: String,
        /// Captured output, when the process ran.
        output: Option<String>,
    },

    /// Writing or removing an artifact failed.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("Database error: {0}")]
    Database(DatabaseError),

    /// A required credential is not configured. Never retried.
    #[error("Missing credential: {0}")]
    MissingCredential(String),
}

impl ControlError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Whether retrying the same operation could succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ExternalProcess { .. } | Self::Artifact(_) | Self::Database(_)
        )
    }
}

impl From<GatewayError> for ControlError {
    fn from(e: GatewayError) -> Self {
        Self::ExternalProcess {
            output: e.output().map(str::to_string),
            message: e.to_string(),
        }
    }
}

impl From<DatabaseError> for ControlError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound(what) => Self::NotFound(what),
            other => Self::Database(other),
        }
    }
}

impl From<CertError> for ControlError {
    fn from(e: CertError) -> Self {
        match e {
            CertError::Generation(msg) => Self::Artifact(ArtifactError::Generate(msg)),
            invalid => Self::Validation(invalid.to_string()),
        }
    }
}

/// Result alias for control-plane operations.
pub type ControlResult<T> = Result<T, ControlError>;
