//! Provisioning stages: the ordered remote effects of one run.

use serde::{Deserialize, Serialize};

/// The stages of a provisioning run.
///
/// Progresses linearly: CreateCredential → UploadAvatar → ResolveBlobUrl →
/// PersistProfile. The two avatar stages are skipped together when the run
/// has no avatar and the policy allows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    CreateCredential,
    UploadAvatar,
    ResolveBlobUrl,
    PersistProfile,
}

impl Stage {
    /// All stages in execution order.
    pub const ORDER: [Stage; 4] = [
        Stage::CreateCredential,
        Stage::UploadAvatar,
        Stage::ResolveBlobUrl,
        Stage::PersistProfile,
    ];

    /// Whether the stage depends on the avatar blob.
    pub fn needs_avatar(&self) -> bool {
        matches!(self, Self::UploadAvatar | Self::ResolveBlobUrl)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CreateCredential => "create_credential",
            Self::UploadAvatar => "upload_avatar",
            Self::ResolveBlobUrl => "resolve_blob_url",
            Self::PersistProfile => "persist_profile",
        };
        write!(f, "{s}")
    }
}
