//! Error types for account onboarding.

use std::path::PathBuf;
use std::time::Duration;

use crate::onboarding::model::AccountId;
use crate::onboarding::stage::Stage;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Bad user-supplied input, as opposed to bad configuration.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Cannot read avatar '{}': {source}", path.display())]
    AvatarUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by a remote collaborator (credentials, blobs, profiles).
///
/// The pipeline never inspects these beyond wrapping them in the variant of
/// the stage that produced them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// What happened to the side effects of earlier stages after a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    /// Compensation is disabled; earlier effects were left in place.
    NotAttempted,
    /// Every earlier effect was undone.
    RolledBack,
    /// At least one compensating action failed. `account_deleted` tells
    /// whether the credential itself is gone even though something else
    /// (the blob) could not be removed.
    Failed {
        account_deleted: bool,
        reason: String,
    },
}

impl Compensation {
    /// Whether the account issued by the run no longer exists.
    pub fn account_deleted(&self) -> bool {
        match self {
            Self::NotAttempted => false,
            Self::RolledBack => true,
            Self::Failed {
                account_deleted, ..
            } => *account_deleted,
        }
    }
}

impl std::fmt::Display for Compensation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAttempted => write!(f, "not attempted"),
            Self::RolledBack => write!(f, "rolled back"),
            Self::Failed { reason, .. } => write!(f, "failed: {reason}"),
        }
    }
}

/// Stage-tagged failure of a provisioning run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Credential creation failed: {0}")]
    CredentialCreationFailed(#[source] BackendError),

    #[error("No avatar was supplied")]
    AvatarMissing,

    #[error("Avatar upload failed for account {account_id} (compensation {compensation}): {source}")]
    UploadFailed {
        account_id: AccountId,
        compensation: Compensation,
        #[source]
        source: BackendError,
    },

    #[error("Avatar URL resolution failed for account {account_id} (compensation {compensation}): {source}")]
    UrlResolutionFailed {
        account_id: AccountId,
        compensation: Compensation,
        #[source]
        source: BackendError,
    },

    #[error("Profile persist failed for account {account_id} (compensation {compensation}): {source}")]
    ProfilePersistFailed {
        account_id: AccountId,
        compensation: Compensation,
        #[source]
        source: BackendError,
    },
}

impl PipelineError {
    /// The stage the run stopped at. `None` for `AvatarMissing`, which is
    /// raised before any remote call.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::CredentialCreationFailed(_) => Some(Stage::CreateCredential),
            Self::AvatarMissing => None,
            Self::UploadFailed { .. } => Some(Stage::UploadAvatar),
            Self::UrlResolutionFailed { .. } => Some(Stage::ResolveBlobUrl),
            Self::ProfilePersistFailed { .. } => Some(Stage::PersistProfile),
        }
    }

    /// The backend error behind this failure, if any.
    pub fn cause(&self) -> Option<&BackendError> {
        match self {
            Self::CredentialCreationFailed(source)
            | Self::UploadFailed { source, .. }
            | Self::UrlResolutionFailed { source, .. }
            | Self::ProfilePersistFailed { source, .. } => Some(source),
            Self::AvatarMissing => None,
        }
    }

    /// Compensation outcome for failures after the credential was issued.
    pub fn compensation(&self) -> Option<&Compensation> {
        match self {
            Self::UploadFailed { compensation, .. }
            | Self::UrlResolutionFailed { compensation, .. }
            | Self::ProfilePersistFailed { compensation, .. } => Some(compensation),
            Self::CredentialCreationFailed(_) | Self::AvatarMissing => None,
        }
    }

    /// The account left allocated without a profile, if the run orphaned one.
    ///
    /// `None` once compensation removed the account, even if the blob
    /// could not be deleted.
    pub fn orphaned_account(&self) -> Option<&AccountId> {
        match self {
            Self::UploadFailed {
                account_id,
                compensation,
                ..
            }
            | Self::UrlResolutionFailed {
                account_id,
                compensation,
                ..
            }
            | Self::ProfilePersistFailed {
                account_id,
                compensation,
                ..
            } if !compensation.account_deleted() => Some(account_id),
            _ => None,
        }
    }
}
