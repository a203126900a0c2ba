//! Account provisioning pipeline: runs the sign-up stages in order.
//!
//! Flow:
//! 1. CreateCredential → `Credential` (account id, optional ID token)
//! 2. UploadAvatar (fresh `BlobKey`) → `StorageHandle`
//! 3. ResolveBlobUrl → public URL
//! 4. PersistProfile → `ProfileRecord` keyed by the account id
//!
//! Stages 2-4 run with the `Credential` from stage 1, so backends can act as
//! the newly created user.
//!
//! Each stage waits for the previous one; the first failure ends the run with
//! an error tagged by that stage. Nothing is retried. Effects of completed
//! stages stay in place unless compensation is enabled, in which case they
//! are undone in reverse order.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::backend::{BlobStore, CredentialService, ProfileStore};
use crate::config::{AvatarPolicy, ProvisioningConfig};
use crate::error::{BackendError, Compensation, PipelineError};

use super::form::FormInput;
use super::model::{AvatarBlob, BlobKey, Credential, PipelineResult, ProfileRecord, StorageHandle};
use super::stage::Stage;

/// Orchestrates one sign-up against the three backend collaborators.
///
/// Holds no per-run state, so a single instance can serve concurrent runs.
/// Duplicate submissions are not deduplicated; each run issues its own
/// account and blob key.
pub struct AccountProvisioningPipeline {
    credentials: Arc<dyn CredentialService>,
    blobs: Arc<dyn BlobStore>,
    profiles: Arc<dyn ProfileStore>,
    config: ProvisioningConfig,
}

impl AccountProvisioningPipeline {
    pub fn new(
        credentials: Arc<dyn CredentialService>,
        blobs: Arc<dyn BlobStore>,
        profiles: Arc<dyn ProfileStore>,
        config: ProvisioningConfig,
    ) -> Self {
        Self {
            credentials,
            blobs,
            profiles,
            config,
        }
    }

    /// Provision an account for `form`.
    ///
    /// The caller is expected to have checked the form with
    /// `FormValidator::is_valid`; the fields are not re-checked here.
    /// An empty avatar counts as no avatar.
    pub async fn run(&self, form: &FormInput, avatar: Option<AvatarBlob>) -> PipelineResult {
        let avatar = avatar.filter(|a| !a.is_empty());

        if avatar.is_none() && self.config.avatar_policy == AvatarPolicy::Required {
            debug!(email = %form.email, "No avatar supplied");
            warn!("Refusing to provision without an avatar");
            return Err(PipelineError::AvatarMissing);
        }

        let plan = Self::plan(avatar.is_some());
        debug!(email = %form.email, stages = ?plan, "Provisioning account");

        // Step 1: credential
        let credential = self
            .run_stage(
                Stage::CreateCredential,
                self.credentials.create_account(&form.email, &form.password),
            )
            .await
            .map_err(PipelineError::CredentialCreationFailed)?;
        info!(
            account_id = %credential.account_id(),
            has_avatar = avatar.is_some(),
            "Credential issued"
        );

        // Steps 2-3: avatar blob and its URL
        let (avatar_url, uploaded) = match avatar {
            Some(avatar) => {
                let (url, handle) = self.store_avatar(&credential, &avatar).await?;
                (url, Some(handle))
            }
            None => {
                debug!(
                    account_id = %credential.account_id(),
                    "No avatar; skipping upload and URL resolution"
                );
                (String::new(), None)
            }
        };

        // Step 4: profile
        let record = ProfileRecord::new(
            credential.account_id().clone(),
            form.username.clone(),
            avatar_url,
        );
        if let Err(source) = self
            .run_stage(
                Stage::PersistProfile,
                self.profiles.upsert(&credential, &record),
            )
            .await
        {
            let compensation = self.compensate(&credential, uploaded.as_ref()).await;
            return Err(PipelineError::ProfilePersistFailed {
                account_id: credential.account_id().clone(),
                compensation,
                source,
            });
        }

        info!(account_id = %record.account_id, "Account provisioned");
        Ok(record)
    }

    /// Stages a run will execute, in order.
    fn plan(has_avatar: bool) -> Vec<Stage> {
        Stage::ORDER
            .into_iter()
            .filter(|stage| has_avatar || !stage.needs_avatar())
            .collect()
    }

    /// Upload the avatar under a fresh key and resolve its public URL.
    async fn store_avatar(
        &self,
        credential: &Credential,
        avatar: &AvatarBlob,
    ) -> Result<(String, StorageHandle), PipelineError> {
        let account_id = credential.account_id();
        let key = BlobKey::generate();
        let namespace = self.config.avatar_namespace.as_str();
        debug!(
            account_id = %account_id,
            blob_key = %key,
            bytes = avatar.len(),
            quality = avatar.quality(),
            "Minted blob key"
        );

        let handle = match self
            .run_stage(
                Stage::UploadAvatar,
                self.blobs.put(credential, namespace, &key, avatar),
            )
            .await
        {
            Ok(handle) => handle,
            Err(source) => {
                let compensation = self.compensate(credential, None).await;
                return Err(PipelineError::UploadFailed {
                    account_id: account_id.clone(),
                    compensation,
                    source,
                });
            }
        };

        match self
            .run_stage(
                Stage::ResolveBlobUrl,
                self.blobs.resolve_url(credential, &handle),
            )
            .await
        {
            Ok(url) => Ok((url, handle)),
            Err(source) => {
                let compensation = self.compensate(credential, Some(&handle)).await;
                Err(PipelineError::UrlResolutionFailed {
                    account_id: account_id.clone(),
                    compensation,
                    source,
                })
            }
        }
    }

    /// Await one stage's remote call under the configured timeout.
    async fn run_stage<T, F>(&self, stage: Stage, call: F) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        debug!(stage = %stage, "Stage started");
        let result = self.bounded(call).await;
        match &result {
            Ok(_) => debug!(stage = %stage, "Stage completed"),
            Err(e) => warn!(stage = %stage, error = %e, "Stage failed"),
        }
        result
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        match self.config.stage_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(BackendError::Timeout(limit))),
            None => call.await,
        }
    }

    /// Undo earlier stages after a failure: blob first, then credential.
    async fn compensate(
        &self,
        credential: &Credential,
        uploaded: Option<&StorageHandle>,
    ) -> Compensation {
        let account_id = credential.account_id();
        if !self.config.compensate_on_failure {
            warn!(
                account_id = %account_id,
                blob = uploaded.map(|h| h.path.as_str()).unwrap_or("none"),
                "Run failed after credential creation; account left without a profile"
            );
            return Compensation::NotAttempted;
        }

        let mut failures = Vec::new();

        if let Some(handle) = uploaded {
            match self.bounded(self.blobs.delete(credential, handle)).await {
                Ok(()) => debug!(path = %handle.path, "Compensated: blob deleted"),
                Err(e) => failures.push(format!("delete blob {}: {e}", handle.path)),
            }
        }

        let deleted = self.bounded(self.credentials.delete_account(credential)).await;
        let account_deleted = match deleted {
            Ok(()) => {
                debug!(account_id = %account_id, "Compensated: account deleted");
                true
            }
            Err(e) => {
                failures.push(format!("delete account {account_id}: {e}"));
                false
            }
        };

        if failures.is_empty() {
            info!(account_id = %account_id, "Rolled back partial provisioning");
            Compensation::RolledBack
        } else {
            let reason = failures.join("; ");
            error!(
                account_id = %account_id,
                account_deleted,
                reason = %reason,
                "Compensation failed"
            );
            Compensation::Failed {
                account_deleted,
                reason,
            }
        }
    }
}
