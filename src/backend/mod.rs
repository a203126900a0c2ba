//! Remote collaborators of the provisioning pipeline.
//!
//! Each trait is pure I/O with one operation per remote effect. The pipeline
//! owns ordering, error tagging, and compensation; implementations only
//! report success or a `BackendError`.
//!
//! Every call after account creation receives the run's `Credential`, so
//! backends that enforce per-user rules can act as the new account.

pub mod firebase;
pub mod memory;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::BackendError;
use crate::onboarding::model::{AvatarBlob, BlobKey, Credential, ProfileRecord, StorageHandle};

pub use firebase::{FirebaseAuth, FirebaseConfig, FirebaseDatabase, FirebaseStorage};
pub use memory::{InMemoryBlobStore, InMemoryCredentialService, InMemoryProfileStore};

/// Identity provider that issues account ids.
#[async_trait]
pub trait CredentialService: Send + Sync {
    /// Create an identity for `email` / `password`.
    async fn create_account(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Credential, BackendError>;

    /// Remove an identity created by `create_account`.
    ///
    /// Only called as a compensating action after a later stage failed.
    async fn delete_account(&self, credential: &Credential) -> Result<(), BackendError>;
}

/// Object store for avatar blobs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `blob` under `key` inside `namespace`.
    async fn put(
        &self,
        credential: &Credential,
        namespace: &str,
        key: &BlobKey,
        blob: &AvatarBlob,
    ) -> Result<StorageHandle, BackendError>;

    /// Turn a handle into an absolute, dereferenceable URL.
    async fn resolve_url(
        &self,
        credential: &Credential,
        handle: &StorageHandle,
    ) -> Result<String, BackendError>;

    /// Remove a stored blob. Only called as a compensating action.
    async fn delete(
        &self,
        credential: &Credential,
        handle: &StorageHandle,
    ) -> Result<(), BackendError>;
}

/// Keyed store for profile records.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Write `record` under `credential.account_id()`, replacing any
    /// existing value.
    async fn upsert(
        &self,
        credential: &Credential,
        record: &ProfileRecord,
    ) -> Result<(), BackendError>;
}
