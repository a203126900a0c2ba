//! Account, blob, and profile data models.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipelineError;

/// Default namespace for avatar blobs.
pub const DEFAULT_AVATAR_NAMESPACE: &str = "profile_images";

/// Default JPEG quality hint for avatar encoding.
pub const DEFAULT_AVATAR_QUALITY: f32 = 0.3;

/// Default content type for avatar blobs.
pub const DEFAULT_AVATAR_CONTENT_TYPE: &str = "image/jpeg";

/// Opaque account identifier issued by the credential service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the credential service hands back: the new account's id and, for
/// providers that sign the user in, the ID token later stages act with.
///
/// Lives only as long as one run; nothing keeps the token afterwards.
#[derive(Debug, Clone)]
pub struct Credential {
    account_id: AccountId,
    id_token: Option<SecretString>,
}

impl Credential {
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            id_token: None,
        }
    }

    pub fn with_id_token(mut self, token: impl Into<String>) -> Self {
        self.id_token = Some(SecretString::from(token.into()));
        self
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    /// ID token of the signed-in account, if the provider issued one.
    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_ref().map(|t| t.expose_secret())
    }
}

/// Storage key minted once per provisioning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobKey(Uuid);

impl BlobKey {
    /// Mint a fresh, unique key.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn id(&self) -> Uuid {
        self.0
    }

    /// Object path of this key inside `namespace`, e.g. `profile_images/<uuid>`.
    pub fn object_path(&self, namespace: &str) -> String {
        format!("{}/{}", namespace.trim_end_matches('/'), self.0)
    }
}

impl std::fmt::Display for BlobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a stored blob, returned by the blob store after upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageHandle {
    /// Bucket-relative object path.
    pub path: String,
    /// Backend-specific token needed to build a public URL, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl StorageHandle {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            access_token: None,
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }
}

/// Raw avatar bytes picked by the user, plus encoding hints.
#[derive(Clone, PartialEq)]
pub struct AvatarBlob {
    bytes: Vec<u8>,
    quality: f32,
    content_type: String,
}

impl AvatarBlob {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            quality: DEFAULT_AVATAR_QUALITY,
            content_type: DEFAULT_AVATAR_CONTENT_TYPE.to_string(),
        }
    }

    /// Set the compression quality hint, clamped to `0.0..=1.0`.
    pub fn with_quality(mut self, quality: f32) -> Self {
        self.quality = if quality.is_nan() {
            DEFAULT_AVATAR_QUALITY
        } else {
            quality.clamp(0.0, 1.0)
        };
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for AvatarBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvatarBlob")
            .field("len", &self.bytes.len())
            .field("quality", &self.quality)
            .field("content_type", &self.content_type)
            .finish()
    }
}

/// Profile written once per successful run, keyed by `account_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    #[serde(skip)]
    pub account_id: AccountId,
    pub username: String,
    /// Public avatar URL. Empty when the run skipped the avatar.
    #[serde(rename = "profileImageUrl")]
    pub avatar_url: String,
}

impl ProfileRecord {
    pub fn new(
        account_id: AccountId,
        username: impl Into<String>,
        avatar_url: impl Into<String>,
    ) -> Self {
        Self {
            account_id,
            username: username.into(),
            avatar_url: avatar_url.into(),
        }
    }

    pub fn has_avatar(&self) -> bool {
        !self.avatar_url.is_empty()
    }
}

/// Outcome of one provisioning run.
pub type PipelineResult = Result<ProfileRecord, PipelineError>;
