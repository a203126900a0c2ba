//! Integration tests for the account provisioning pipeline.
//!
//! Every collaborator is a spy that records its calls into a shared log, so
//! tests can assert which remote effects happened and in what order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

use account_onboarding::backend::{
    BlobStore, CredentialService, InMemoryBlobStore, InMemoryCredentialService,
    InMemoryProfileStore, ProfileStore,
};
use account_onboarding::config::{AvatarPolicy, ProvisioningConfig};
use account_onboarding::error::{BackendError, Compensation, PipelineError};
use account_onboarding::onboarding::{
    AccountId, AccountProvisioningPipeline, AvatarBlob, BlobKey, Credential, FormInput,
    FormValidator, ProfileRecord, Stage, StorageHandle,
};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

type CallLog = Arc<Mutex<Vec<&'static str>>>;

fn record(log: &CallLog, call: &'static str) {
    log.lock().unwrap().push(call);
}

// ── Spies ───────────────────────────────────────────────────────────

struct SpyCredentials {
    log: CallLog,
    next_id: AtomicUsize,
    create_error: Option<BackendError>,
    delete_error: Option<BackendError>,
    issued: Mutex<Vec<AccountId>>,
    deleted: Mutex<Vec<AccountId>>,
}

impl SpyCredentials {
    fn new(log: &CallLog) -> Self {
        Self {
            log: Arc::clone(log),
            next_id: AtomicUsize::new(1),
            create_error: None,
            delete_error: None,
            issued: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    fn failing(log: &CallLog, error: BackendError) -> Self {
        Self {
            create_error: Some(error),
            ..Self::new(log)
        }
    }
}

#[async_trait]
impl CredentialService for SpyCredentials {
    async fn create_account(
        &self,
        _email: &str,
        _password: &SecretString,
    ) -> Result<Credential, BackendError> {
        record(&self.log, "create_account");
        if let Some(err) = &self.create_error {
            return Err(err.clone());
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = AccountId::new(format!("uid-{n}"));
        self.issued.lock().unwrap().push(id.clone());
        Ok(Credential::new(id).with_id_token(format!("token-{n}")))
    }

    async fn delete_account(&self, credential: &Credential) -> Result<(), BackendError> {
        record(&self.log, "delete_account");
        if let Some(err) = &self.delete_error {
            return Err(err.clone());
        }
        self.deleted
            .lock()
            .unwrap()
            .push(credential.account_id().clone());
        Ok(())
    }
}

#[derive(Default)]
struct BlobBehaviour {
    put_error: Option<BackendError>,
    resolve_error: Option<BackendError>,
    delete_error: Option<BackendError>,
    put_delay: Option<Duration>,
}

struct SpyBlobs {
    log: CallLog,
    behaviour: BlobBehaviour,
    keys: Mutex<Vec<BlobKey>>,
    namespaces: Mutex<Vec<String>>,
    deleted: Mutex<Vec<StorageHandle>>,
    tokens: Mutex<Vec<Option<String>>>,
}

impl SpyBlobs {
    fn new(log: &CallLog) -> Self {
        Self::with(log, BlobBehaviour::default())
    }

    fn with(log: &CallLog, behaviour: BlobBehaviour) -> Self {
        Self {
            log: Arc::clone(log),
            behaviour,
            keys: Mutex::new(Vec::new()),
            namespaces: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            tokens: Mutex::new(Vec::new()),
        }
    }

    fn acting_as(&self, credential: &Credential) {
        self.tokens
            .lock()
            .unwrap()
            .push(credential.id_token().map(str::to_string));
    }
}

#[async_trait]
impl BlobStore for SpyBlobs {
    async fn put(
        &self,
        credential: &Credential,
        namespace: &str,
        key: &BlobKey,
        _blob: &AvatarBlob,
    ) -> Result<StorageHandle, BackendError> {
        record(&self.log, "put");
        self.acting_as(credential);
        self.keys.lock().unwrap().push(*key);
        self.namespaces.lock().unwrap().push(namespace.to_string());
        if let Some(delay) = self.behaviour.put_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = &self.behaviour.put_error {
            return Err(err.clone());
        }
        Ok(StorageHandle::new(key.object_path(namespace)))
    }

    async fn resolve_url(
        &self,
        credential: &Credential,
        handle: &StorageHandle,
    ) -> Result<String, BackendError> {
        record(&self.log, "resolve_url");
        self.acting_as(credential);
        if let Some(err) = &self.behaviour.resolve_error {
            return Err(err.clone());
        }
        Ok(format!("https://cdn.test/{}", handle.path))
    }

    async fn delete(
        &self,
        credential: &Credential,
        handle: &StorageHandle,
    ) -> Result<(), BackendError> {
        record(&self.log, "delete_blob");
        self.acting_as(credential);
        if let Some(err) = &self.behaviour.delete_error {
            return Err(err.clone());
        }
        self.deleted.lock().unwrap().push(handle.clone());
        Ok(())
    }
}

struct SpyProfiles {
    log: CallLog,
    error: Option<BackendError>,
    written: Mutex<Vec<(AccountId, ProfileRecord)>>,
    tokens: Mutex<Vec<Option<String>>>,
}

impl SpyProfiles {
    fn new(log: &CallLog) -> Self {
        Self {
            log: Arc::clone(log),
            error: None,
            written: Mutex::new(Vec::new()),
            tokens: Mutex::new(Vec::new()),
        }
    }

    fn failing(log: &CallLog, error: BackendError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(log)
        }
    }
}

#[async_trait]
impl ProfileStore for SpyProfiles {
    async fn upsert(
        &self,
        credential: &Credential,
        record_value: &ProfileRecord,
    ) -> Result<(), BackendError> {
        record(&self.log, "upsert");
        self.tokens
            .lock()
            .unwrap()
            .push(credential.id_token().map(str::to_string));
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        self.written
            .lock()
            .unwrap()
            .push((credential.account_id().clone(), record_value.clone()));
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn bob() -> FormInput {
    FormInput::new("a@b.com", "bob", "secret1")
}

fn avatar() -> Option<AvatarBlob> {
    Some(AvatarBlob::new(vec![0xFF, 0xD8, 0xFF, 0xE0]))
}

fn pipeline(
    credentials: &Arc<SpyCredentials>,
    blobs: &Arc<SpyBlobs>,
    profiles: &Arc<SpyProfiles>,
    config: ProvisioningConfig,
) -> AccountProvisioningPipeline {
    AccountProvisioningPipeline::new(
        Arc::clone(credentials) as Arc<dyn CredentialService>,
        Arc::clone(blobs) as Arc<dyn BlobStore>,
        Arc::clone(profiles) as Arc<dyn ProfileStore>,
        config,
    )
}

fn calls(log: &CallLog) -> Vec<&'static str> {
    log.lock().unwrap().clone()
}

// ── Success path ────────────────────────────────────────────────────

#[tokio::test]
async fn successful_run_is_referentially_consistent() {
    let log = CallLog::default();
    let credentials = Arc::new(SpyCredentials::new(&log));
    let blobs = Arc::new(SpyBlobs::new(&log));
    let profiles = Arc::new(SpyProfiles::new(&log));
    let pipeline = pipeline(&credentials, &blobs, &profiles, ProvisioningConfig::default());

    let form = bob();
    assert!(FormValidator::is_valid(&form));

    let record = tokio::time::timeout(TEST_TIMEOUT, pipeline.run(&form, avatar()))
        .await
        .expect("pipeline hung")
        .expect("run should succeed");

    assert_eq!(calls(&log), vec!["create_account", "put", "resolve_url", "upsert"]);

    let issued = credentials.issued.lock().unwrap().clone();
    let keys = blobs.keys.lock().unwrap().clone();
    let written = profiles.written.lock().unwrap().clone();
    assert_eq!(issued.len(), 1);
    assert_eq!(keys.len(), 1);
    assert_eq!(written.len(), 1);

    assert_eq!(record.account_id, issued[0]);
    assert_eq!(written[0].0, issued[0]);
    assert_eq!(written[0].1, record);
    assert_eq!(record.username, "bob");
    assert_eq!(
        record.avatar_url,
        format!("https://cdn.test/profile_images/{}", keys[0])
    );
    assert_eq!(blobs.namespaces.lock().unwrap()[0], "profile_images");

    // Later stages act as the account issued in stage 1
    let token = Some("token-1".to_string());
    assert_eq!(*blobs.tokens.lock().unwrap(), vec![token.clone(), token.clone()]);
    assert_eq!(*profiles.tokens.lock().unwrap(), vec![token]);
}

#[tokio::test]
async fn runs_are_not_deduplicated() {
    let log = CallLog::default();
    let credentials = Arc::new(SpyCredentials::new(&log));
    let blobs = Arc::new(SpyBlobs::new(&log));
    let profiles = Arc::new(SpyProfiles::new(&log));
    let pipeline = pipeline(&credentials, &blobs, &profiles, ProvisioningConfig::default());

    let first = pipeline.run(&bob(), avatar()).await.unwrap();
    let second = pipeline.run(&bob(), avatar()).await.unwrap();

    assert_ne!(first.account_id, second.account_id);
    let keys = blobs.keys.lock().unwrap().clone();
    assert_eq!(keys.len(), 2);
    assert_ne!(keys[0], keys[1]);
    assert_ne!(first.avatar_url, second.avatar_url);
}

#[tokio::test]
async fn concurrent_runs_share_one_pipeline() {
    let pipeline = Arc::new(AccountProvisioningPipeline::new(
        Arc::new(InMemoryCredentialService::new()),
        Arc::new(InMemoryBlobStore::new("https://cdn.test")),
        Arc::new(InMemoryProfileStore::new()),
        ProvisioningConfig::default(),
    ));

    let a = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            pipeline
                .run(&FormInput::new("a@x.com", "alice", "pw"), avatar())
                .await
        })
    };
    let b = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            pipeline
                .run(&FormInput::new("b@x.com", "bruno", "pw"), avatar())
                .await
        })
    };

    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();
    assert_ne!(a.account_id, b.account_id);
    assert_eq!(a.username, "alice");
    assert_eq!(b.username, "bruno");
}

// ── Stage failures ──────────────────────────────────────────────────

#[tokio::test]
async fn credential_failure_stops_before_any_other_call() {
    let log = CallLog::default();
    let credentials = Arc::new(SpyCredentials::failing(
        &log,
        BackendError::Rejected("email already in use".into()),
    ));
    let blobs = Arc::new(SpyBlobs::new(&log));
    let profiles = Arc::new(SpyProfiles::new(&log));
    let pipeline = pipeline(&credentials, &blobs, &profiles, ProvisioningConfig::default());

    let err = pipeline.run(&bob(), avatar()).await.unwrap_err();

    match &err {
        PipelineError::CredentialCreationFailed(BackendError::Rejected(reason)) => {
            assert_eq!(reason, "email already in use");
        }
        other => panic!("Expected CredentialCreationFailed, got {other:?}"),
    }
    assert_eq!(err.stage(), Some(Stage::CreateCredential));
    assert!(err.orphaned_account().is_none());
    assert_eq!(calls(&log), vec!["create_account"]);
    assert!(blobs.keys.lock().unwrap().is_empty());
    assert!(profiles.written.lock().unwrap().is_empty());
}

#[tokio::test]
async fn upload_failure_orphans_the_account() {
    let log = CallLog::default();
    let credentials = Arc::new(SpyCredentials::new(&log));
    let blobs = Arc::new(SpyBlobs::with(
        &log,
        BlobBehaviour {
            put_error: Some(BackendError::Http {
                status: 402,
                body: "storage quota exceeded".into(),
            }),
            ..Default::default()
        },
    ));
    let profiles = Arc::new(SpyProfiles::new(&log));
    let pipeline = pipeline(&credentials, &blobs, &profiles, ProvisioningConfig::default());

    let err = pipeline.run(&bob(), avatar()).await.unwrap_err();

    assert!(matches!(err, PipelineError::UploadFailed { .. }));
    assert_eq!(err.stage(), Some(Stage::UploadAvatar));
    assert_eq!(err.compensation(), Some(&Compensation::NotAttempted));

    let issued = credentials.issued.lock().unwrap().clone();
    assert_eq!(err.orphaned_account(), Some(&issued[0]));
    assert_eq!(calls(&log), vec!["create_account", "put"]);
    assert!(profiles.written.lock().unwrap().is_empty());
}

#[tokio::test]
async fn resolve_failure_never_persists() {
    let log = CallLog::default();
    let credentials = Arc::new(SpyCredentials::new(&log));
    let blobs = Arc::new(SpyBlobs::with(
        &log,
        BlobBehaviour {
            resolve_error: Some(BackendError::NotFound("object vanished".into())),
            ..Default::default()
        },
    ));
    let profiles = Arc::new(SpyProfiles::new(&log));
    let pipeline = pipeline(&credentials, &blobs, &profiles, ProvisioningConfig::default());

    let err = pipeline.run(&bob(), avatar()).await.unwrap_err();

    assert!(matches!(err, PipelineError::UrlResolutionFailed { .. }));
    assert_eq!(err.stage(), Some(Stage::ResolveBlobUrl));
    assert_eq!(
        err.cause(),
        Some(&BackendError::NotFound("object vanished".into()))
    );
    assert_eq!(calls(&log), vec!["create_account", "put", "resolve_url"]);
    assert!(profiles.written.lock().unwrap().is_empty());
}

#[tokio::test]
async fn persist_failure_is_tagged() {
    let log = CallLog::default();
    let credentials = Arc::new(SpyCredentials::new(&log));
    let blobs = Arc::new(SpyBlobs::new(&log));
    let profiles = Arc::new(SpyProfiles::failing(
        &log,
        BackendError::Http {
            status: 401,
            body: "Permission denied".into(),
        },
    ));
    let pipeline = pipeline(&credentials, &blobs, &profiles, ProvisioningConfig::default());

    let err = pipeline.run(&bob(), avatar()).await.unwrap_err();

    assert!(matches!(err, PipelineError::ProfilePersistFailed { .. }));
    assert_eq!(err.stage(), Some(Stage::PersistProfile));
    assert!(err.orphaned_account().is_some());
    // Without compensation the uploaded blob stays too
    assert!(blobs.deleted.lock().unwrap().is_empty());
}

// ── Avatar policy ───────────────────────────────────────────────────

#[tokio::test]
async fn missing_avatar_fails_before_any_remote_call() {
    let log = CallLog::default();
    let credentials = Arc::new(SpyCredentials::new(&log));
    let blobs = Arc::new(SpyBlobs::new(&log));
    let profiles = Arc::new(SpyProfiles::new(&log));
    let pipeline = pipeline(&credentials, &blobs, &profiles, ProvisioningConfig::default());

    let err = pipeline.run(&bob(), None).await.unwrap_err();

    assert!(matches!(err, PipelineError::AvatarMissing));
    assert!(err.stage().is_none());
    assert!(calls(&log).is_empty());
}

#[tokio::test]
async fn optional_avatar_skips_blob_stages() {
    let log = CallLog::default();
    let credentials = Arc::new(SpyCredentials::new(&log));
    let blobs = Arc::new(SpyBlobs::new(&log));
    let profiles = Arc::new(SpyProfiles::new(&log));
    let config = ProvisioningConfig::default().with_avatar_policy(AvatarPolicy::Optional);
    let pipeline = pipeline(&credentials, &blobs, &profiles, config);

    let record = pipeline.run(&bob(), None).await.unwrap();

    assert_eq!(calls(&log), vec!["create_account", "upsert"]);
    assert_eq!(record.avatar_url, "");
    assert!(blobs.keys.lock().unwrap().is_empty());
}

// ── Compensation ────────────────────────────────────────────────────

#[tokio::test]
async fn compensation_deletes_account_after_upload_failure() {
    let log = CallLog::default();
    let credentials = Arc::new(SpyCredentials::new(&log));
    let blobs = Arc::new(SpyBlobs::with(
        &log,
        BlobBehaviour {
            put_error: Some(BackendError::Transport("connection reset".into())),
            ..Default::default()
        },
    ));
    let profiles = Arc::new(SpyProfiles::new(&log));
    let config = ProvisioningConfig::default().with_compensation(true);
    let pipeline = pipeline(&credentials, &blobs, &profiles, config);

    let err = pipeline.run(&bob(), avatar()).await.unwrap_err();

    assert_eq!(err.stage(), Some(Stage::UploadAvatar));
    assert_eq!(err.compensation(), Some(&Compensation::RolledBack));
    assert!(err.orphaned_account().is_none());
    assert_eq!(calls(&log), vec!["create_account", "put", "delete_account"]);
    assert_eq!(
        *credentials.deleted.lock().unwrap(),
        *credentials.issued.lock().unwrap()
    );
}

#[tokio::test]
async fn compensation_unwinds_in_reverse_order() {
    let log = CallLog::default();
    let credentials = Arc::new(SpyCredentials::new(&log));
    let blobs = Arc::new(SpyBlobs::new(&log));
    let profiles = Arc::new(SpyProfiles::failing(
        &log,
        BackendError::Transport("database offline".into()),
    ));
    let config = ProvisioningConfig::default().with_compensation(true);
    let pipeline = pipeline(&credentials, &blobs, &profiles, config);

    let err = pipeline.run(&bob(), avatar()).await.unwrap_err();

    assert_eq!(err.stage(), Some(Stage::PersistProfile));
    assert_eq!(err.compensation(), Some(&Compensation::RolledBack));
    assert_eq!(
        calls(&log),
        vec![
            "create_account",
            "put",
            "resolve_url",
            "upsert",
            "delete_blob",
            "delete_account"
        ]
    );
    let key = blobs.keys.lock().unwrap()[0];
    assert_eq!(
        blobs.deleted.lock().unwrap()[0].path,
        key.object_path("profile_images")
    );
}

#[tokio::test]
async fn failed_compensation_keeps_original_error() {
    let log = CallLog::default();
    let credentials = Arc::new(SpyCredentials {
        delete_error: Some(BackendError::Rejected("TOKEN_EXPIRED".into())),
        ..SpyCredentials::new(&log)
    });
    let blobs = Arc::new(SpyBlobs::with(
        &log,
        BlobBehaviour {
            resolve_error: Some(BackendError::Transport("timeout".into())),
            ..Default::default()
        },
    ));
    let profiles = Arc::new(SpyProfiles::new(&log));
    let config = ProvisioningConfig::default().with_compensation(true);
    let pipeline = pipeline(&credentials, &blobs, &profiles, config);

    let err = pipeline.run(&bob(), avatar()).await.unwrap_err();

    assert_eq!(err.stage(), Some(Stage::ResolveBlobUrl));
    assert_eq!(err.cause(), Some(&BackendError::Transport("timeout".into())));
    match err.compensation() {
        Some(Compensation::Failed {
            account_deleted: false,
            reason,
        }) => assert!(reason.contains("TOKEN_EXPIRED")),
        other => panic!("Expected failed compensation, got {other:?}"),
    }
    // Blob was removed, the account could not be
    assert_eq!(blobs.deleted.lock().unwrap().len(), 1);
    assert!(err.orphaned_account().is_some());
}

#[tokio::test]
async fn blob_left_behind_does_not_orphan_deleted_account() {
    let log = CallLog::default();
    let credentials = Arc::new(SpyCredentials::new(&log));
    let blobs = Arc::new(SpyBlobs::with(
        &log,
        BlobBehaviour {
            resolve_error: Some(BackendError::Transport("metadata unavailable".into())),
            delete_error: Some(BackendError::Transport("blob delete refused".into())),
            ..Default::default()
        },
    ));
    let profiles = Arc::new(SpyProfiles::new(&log));
    let config = ProvisioningConfig::default().with_compensation(true);
    let pipeline = pipeline(&credentials, &blobs, &profiles, config);

    let err = pipeline.run(&bob(), avatar()).await.unwrap_err();

    assert_eq!(err.stage(), Some(Stage::ResolveBlobUrl));
    match err.compensation() {
        Some(Compensation::Failed {
            account_deleted: true,
            reason,
        }) => assert!(reason.contains("blob delete refused")),
        other => panic!("Expected blob-only compensation failure, got {other:?}"),
    }
    // The account is gone, so nothing is reported as orphaned
    assert!(err.orphaned_account().is_none());
    assert_eq!(
        *credentials.deleted.lock().unwrap(),
        *credentials.issued.lock().unwrap()
    );
    assert_eq!(
        calls(&log),
        vec![
            "create_account",
            "put",
            "resolve_url",
            "delete_blob",
            "delete_account"
        ]
    );
}

// ── Timeouts ────────────────────────────────────────────────────────

#[tokio::test]
async fn stalled_stage_times_out() {
    let log = CallLog::default();
    let credentials = Arc::new(SpyCredentials::new(&log));
    let blobs = Arc::new(SpyBlobs::with(
        &log,
        BlobBehaviour {
            put_delay: Some(Duration::from_secs(30)),
            ..Default::default()
        },
    ));
    let profiles = Arc::new(SpyProfiles::new(&log));
    let limit = Duration::from_millis(50);
    let config = ProvisioningConfig::default().with_stage_timeout(limit);
    let pipeline = pipeline(&credentials, &blobs, &profiles, config);

    let err = tokio::time::timeout(TEST_TIMEOUT, pipeline.run(&bob(), avatar()))
        .await
        .expect("stage timeout did not fire")
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::UploadAvatar));
    assert_eq!(err.cause(), Some(&BackendError::Timeout(limit)));
    assert!(profiles.written.lock().unwrap().is_empty());
}
