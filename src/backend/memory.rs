//! In-process backends for local development and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{BlobStore, CredentialService, ProfileStore};
use crate::error::BackendError;
use crate::onboarding::model::{
    AccountId, AvatarBlob, BlobKey, Credential, ProfileRecord, StorageHandle,
};

/// Rejection reason for a duplicate email, matching the identity provider's code.
pub const EMAIL_EXISTS: &str = "EMAIL_EXISTS";

/// Credential service keeping identities in a map keyed by email.
#[derive(Default)]
pub struct InMemoryCredentialService {
    accounts: RwLock<HashMap<String, AccountId>>,
}

impl InMemoryCredentialService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live identities.
    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.accounts.read().await.is_empty()
    }

    /// Look up the account issued for `email`.
    pub async fn account_for(&self, email: &str) -> Option<AccountId> {
        self.accounts.read().await.get(email).cloned()
    }
}

#[async_trait]
impl CredentialService for InMemoryCredentialService {
    async fn create_account(
        &self,
        email: &str,
        _password: &SecretString,
    ) -> Result<Credential, BackendError> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(email) {
            return Err(BackendError::Rejected(EMAIL_EXISTS.to_string()));
        }
        let id = AccountId::new(Uuid::new_v4().simple().to_string());
        accounts.insert(email.to_string(), id.clone());
        debug!(account_id = %id, "Issued in-memory account");
        Ok(Credential::new(id))
    }

    async fn delete_account(&self, credential: &Credential) -> Result<(), BackendError> {
        let account_id = credential.account_id();
        let mut accounts = self.accounts.write().await;
        let before = accounts.len();
        accounts.retain(|_, id| id != account_id);
        if accounts.len() == before {
            return Err(BackendError::NotFound(account_id.to_string()));
        }
        Ok(())
    }
}

/// Blob store holding objects in memory, served from a fake base URL.
pub struct InMemoryBlobStore {
    base_url: String,
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Bytes stored at `path`, if present.
    pub async fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(path).cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new("memory://blobs")
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(
        &self,
        _credential: &Credential,
        namespace: &str,
        key: &BlobKey,
        blob: &AvatarBlob,
    ) -> Result<StorageHandle, BackendError> {
        let path = key.object_path(namespace);
        self.objects
            .write()
            .await
            .insert(path.clone(), blob.bytes().to_vec());
        Ok(StorageHandle::new(path))
    }

    async fn resolve_url(
        &self,
        _credential: &Credential,
        handle: &StorageHandle,
    ) -> Result<String, BackendError> {
        if !self.objects.read().await.contains_key(&handle.path) {
            return Err(BackendError::NotFound(handle.path.clone()));
        }
        Ok(format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            handle.path
        ))
    }

    async fn delete(
        &self,
        _credential: &Credential,
        handle: &StorageHandle,
    ) -> Result<(), BackendError> {
        self.objects
            .write()
            .await
            .remove(&handle.path)
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(handle.path.clone()))
    }
}

/// Profile store keyed by account id.
#[derive(Default)]
pub struct InMemoryProfileStore {
    records: RwLock<HashMap<AccountId, ProfileRecord>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, account_id: &AccountId) -> Option<ProfileRecord> {
        self.records.read().await.get(account_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn upsert(
        &self,
        credential: &Credential,
        record: &ProfileRecord,
    ) -> Result<(), BackendError> {
        self.records
            .write()
            .await
            .insert(credential.account_id().clone(), record.clone());
        Ok(())
    }
}
