//! Firebase REST backends: Identity Toolkit, Cloud Storage, Realtime Database.
//!
//! Talks to the public REST surfaces directly with `reqwest`. Endpoint base
//! URLs are configurable so the same code runs against the local emulators.

use async_trait::async_trait;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{BlobStore, CredentialService, ProfileStore};
use crate::error::{BackendError, ConfigError};
use crate::onboarding::model::{
    AccountId, AvatarBlob, BlobKey, Credential, ProfileRecord, StorageHandle,
};

const DEFAULT_IDENTITY_URL: &str = "https://identitytoolkit.googleapis.com";
const DEFAULT_STORAGE_URL: &str = "https://firebasestorage.googleapis.com";

/// Connection settings for a Firebase project.
#[derive(Debug, Clone)]
pub struct FirebaseConfig {
    /// Web API key used by the Identity Toolkit.
    pub api_key: SecretString,
    /// Storage bucket, e.g. `my-app.appspot.com`.
    pub storage_bucket: String,
    /// Realtime Database root, e.g. `https://my-app.firebaseio.com`.
    pub database_url: String,
    /// Database secret appended as `auth=` when a write has no user token.
    pub database_auth: Option<SecretString>,
    pub identity_url: String,
    pub storage_url: String,
}

impl FirebaseConfig {
    /// Build from environment variables. Returns `None` when
    /// `FIREBASE_API_KEY` is unset.
    pub fn from_env() -> Option<Result<Self, ConfigError>> {
        let api_key = std::env::var("FIREBASE_API_KEY").ok()?;
        Some(Self::from_parts(
            api_key,
            std::env::var("FIREBASE_STORAGE_BUCKET").ok(),
            std::env::var("FIREBASE_DATABASE_URL").ok(),
            std::env::var("FIREBASE_DATABASE_AUTH").ok(),
            std::env::var("FIREBASE_IDENTITY_URL").ok(),
            std::env::var("FIREBASE_STORAGE_URL").ok(),
        ))
    }

    fn from_parts(
        api_key: String,
        storage_bucket: Option<String>,
        database_url: Option<String>,
        database_auth: Option<String>,
        identity_url: Option<String>,
        storage_url: Option<String>,
    ) -> Result<Self, ConfigError> {
        let storage_bucket = storage_bucket
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("FIREBASE_STORAGE_BUCKET".into()))?;
        let database_url = database_url
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("FIREBASE_DATABASE_URL".into()))?;

        for (key, value) in [
            ("FIREBASE_DATABASE_URL", Some(&database_url)),
            ("FIREBASE_IDENTITY_URL", identity_url.as_ref()),
            ("FIREBASE_STORAGE_URL", storage_url.as_ref()),
        ] {
            if let Some(value) = value {
                Url::parse(value).map_err(|e| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })?;
            }
        }

        Ok(Self {
            api_key: SecretString::from(api_key),
            storage_bucket,
            database_url,
            database_auth: database_auth
                .filter(|s| !s.is_empty())
                .map(SecretString::from),
            identity_url: identity_url.unwrap_or_else(|| DEFAULT_IDENTITY_URL.to_string()),
            storage_url: storage_url.unwrap_or_else(|| DEFAULT_STORAGE_URL.to_string()),
        })
    }
}

// ── Error mapping ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Structured { message: String },
    Plain(String),
}

/// Map a failed response into a `BackendError`.
///
/// A 400 with a Firebase error envelope is a rejection carrying the
/// provider's code (e.g. `EMAIL_EXISTS`); everything else keeps its status.
fn classify_failure(status: u16, body: &str) -> BackendError {
    if status == 400 {
        if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
            let message = match envelope.error {
                ErrorDetail::Structured { message } | ErrorDetail::Plain(message) => message,
            };
            return BackendError::Rejected(message);
        }
    }
    if status == 404 {
        return BackendError::NotFound(body.to_string());
    }
    BackendError::Http {
        status,
        body: body.to_string(),
    }
}

async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), "Firebase request failed");
    Err(classify_failure(status.as_u16(), &body))
}

fn parse_base(base: &str) -> Result<Url, BackendError> {
    Url::parse(base).map_err(|e| BackendError::Transport(format!("invalid base URL {base}: {e}")))
}

// ── Identity Toolkit ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignUpResponse {
    local_id: String,
    #[serde(default)]
    id_token: Option<String>,
}

/// Credential service backed by the Identity Toolkit `accounts:*` API.
///
/// Sign-up also signs the user in; the returned ID token rides along in the
/// `Credential` and is what Storage and the Database see on later calls.
pub struct FirebaseAuth {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
}

impl FirebaseAuth {
    pub fn new(config: &FirebaseConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: &FirebaseConfig) -> Self {
        Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.identity_url.clone(),
        }
    }

    fn api_url(&self, method: &str) -> Result<Url, BackendError> {
        accounts_url(&self.base_url, method, self.api_key.expose_secret())
    }
}

fn accounts_url(base: &str, method: &str, api_key: &str) -> Result<Url, BackendError> {
    let mut url = parse_base(base)?;
    url.path_segments_mut()
        .map_err(|_| BackendError::Transport(format!("base URL cannot be a base: {base}")))?
        .pop_if_empty()
        .push("v1")
        .push(&format!("accounts:{method}"));
    url.query_pairs_mut().append_pair("key", api_key);
    Ok(url)
}

#[async_trait]
impl CredentialService for FirebaseAuth {
    async fn create_account(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Credential, BackendError> {
        let body = serde_json::json!({
            "email": email,
            "password": password.expose_secret(),
            "returnSecureToken": true,
        });
        let resp = self
            .client
            .post(self.api_url("signUp")?)
            .json(&body)
            .send()
            .await?;
        let parsed: SignUpResponse = ensure_success(resp).await?.json().await?;

        let account_id = AccountId::new(parsed.local_id);
        info!(account_id = %account_id, "Created Firebase account");

        let credential = Credential::new(account_id);
        Ok(match parsed.id_token {
            Some(token) => credential.with_id_token(token),
            None => credential,
        })
    }

    async fn delete_account(&self, credential: &Credential) -> Result<(), BackendError> {
        let account_id = credential.account_id();
        let token = credential
            .id_token()
            .ok_or_else(|| BackendError::NotFound(format!("no ID token for {account_id}")))?;

        let resp = self
            .client
            .post(self.api_url("delete")?)
            .json(&serde_json::json!({ "idToken": token }))
            .send()
            .await?;
        ensure_success(resp).await?;
        info!(account_id = %account_id, "Deleted Firebase account");
        Ok(())
    }
}

// ── Cloud Storage ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMetadata {
    name: String,
    #[serde(default)]
    download_tokens: Option<String>,
}

impl ObjectMetadata {
    /// First of the comma-separated download tokens.
    fn first_token(&self) -> Option<&str> {
        self.download_tokens
            .as_deref()
            .and_then(|t| t.split(',').map(str::trim).find(|t| !t.is_empty()))
    }
}

/// Blob store backed by the Firebase Storage `v0` REST API.
pub struct FirebaseStorage {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
}

impl FirebaseStorage {
    pub fn new(config: &FirebaseConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: &FirebaseConfig) -> Self {
        Self {
            client,
            base_url: config.storage_url.clone(),
            bucket: config.storage_bucket.clone(),
        }
    }

    fn objects_url(&self) -> Result<Url, BackendError> {
        bucket_objects_url(&self.base_url, &self.bucket)
    }

    fn object_url(&self, path: &str) -> Result<Url, BackendError> {
        object_url(&self.base_url, &self.bucket, path)
    }
}

fn bucket_objects_url(base: &str, bucket: &str) -> Result<Url, BackendError> {
    let mut url = parse_base(base)?;
    url.path_segments_mut()
        .map_err(|_| BackendError::Transport(format!("base URL cannot be a base: {base}")))?
        .pop_if_empty()
        .extend(["v0", "b", bucket, "o"]);
    Ok(url)
}

/// Object URL with the whole path as one encoded segment (`a/b` → `a%2Fb`).
fn object_url(base: &str, bucket: &str, path: &str) -> Result<Url, BackendError> {
    let mut url = bucket_objects_url(base, bucket)?;
    url.path_segments_mut()
        .map_err(|_| BackendError::Transport(format!("base URL cannot be a base: {base}")))?
        .push(path);
    Ok(url)
}

/// Attach the user's ID token the way Firebase Storage expects it.
fn as_user(request: reqwest::RequestBuilder, credential: &Credential) -> reqwest::RequestBuilder {
    match credential.id_token() {
        Some(token) => {
            request.header(reqwest::header::AUTHORIZATION, format!("Firebase {token}"))
        }
        None => request,
    }
}

fn download_url(mut object: Url, token: &str) -> String {
    object
        .query_pairs_mut()
        .append_pair("alt", "media")
        .append_pair("token", token);
    object.to_string()
}

#[async_trait]
impl BlobStore for FirebaseStorage {
    async fn put(
        &self,
        credential: &Credential,
        namespace: &str,
        key: &BlobKey,
        blob: &AvatarBlob,
    ) -> Result<StorageHandle, BackendError> {
        let path = key.object_path(namespace);
        let mut url = self.objects_url()?;
        url.query_pairs_mut().append_pair("name", &path);

        let resp = as_user(self.client.post(url), credential)
            .header(reqwest::header::CONTENT_TYPE, blob.content_type())
            .body(blob.bytes().to_vec())
            .send()
            .await?;
        let metadata: ObjectMetadata = ensure_success(resp).await?.json().await?;
        debug!(path = %metadata.name, bytes = blob.len(), "Uploaded blob");

        let mut handle = StorageHandle::new(metadata.name.clone());
        if let Some(token) = metadata.first_token() {
            handle = handle.with_access_token(token);
        }
        Ok(handle)
    }

    async fn resolve_url(
        &self,
        credential: &Credential,
        handle: &StorageHandle,
    ) -> Result<String, BackendError> {
        let object = self.object_url(&handle.path)?;
        let resp = as_user(self.client.get(object.clone()), credential)
            .send()
            .await?;
        let metadata: ObjectMetadata = ensure_success(resp).await?.json().await?;

        let token = metadata
            .first_token()
            .or(handle.access_token.as_deref())
            .ok_or_else(|| {
                BackendError::InvalidResponse(format!("no download token for {}", handle.path))
            })?;
        Ok(download_url(object, token))
    }

    async fn delete(
        &self,
        credential: &Credential,
        handle: &StorageHandle,
    ) -> Result<(), BackendError> {
        let resp = as_user(self.client.delete(self.object_url(&handle.path)?), credential)
            .send()
            .await?;
        ensure_success(resp).await?;
        info!(path = %handle.path, "Deleted blob");
        Ok(())
    }
}

// ── Realtime Database ───────────────────────────────────────────────

/// Profile store writing `{ <uid>: record }` under a collection node.
pub struct FirebaseDatabase {
    client: reqwest::Client,
    database_url: String,
    collection: String,
    auth: Option<SecretString>,
}

impl FirebaseDatabase {
    pub fn new(config: &FirebaseConfig, collection: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), config, collection)
    }

    pub fn with_client(
        client: reqwest::Client,
        config: &FirebaseConfig,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            client,
            database_url: config.database_url.clone(),
            collection: collection.into(),
            auth: config.database_auth.clone(),
        }
    }

    /// Writes go out as the signed-in user, falling back to the configured
    /// database secret when the credential carries no token.
    fn collection_url(&self, credential: &Credential) -> Result<Url, BackendError> {
        let auth = credential
            .id_token()
            .or_else(|| self.auth.as_ref().map(|a| a.expose_secret()));
        collection_url(&self.database_url, &self.collection, auth)
    }
}

fn collection_url(base: &str, collection: &str, auth: Option<&str>) -> Result<Url, BackendError> {
    let mut url = parse_base(base)?;
    url.path_segments_mut()
        .map_err(|_| BackendError::Transport(format!("base URL cannot be a base: {base}")))?
        .pop_if_empty()
        .push(&format!("{collection}.json"));
    if let Some(auth) = auth {
        url.query_pairs_mut().append_pair("auth", auth);
    }
    Ok(url)
}

/// PATCH body updating only the child for this account.
fn profile_patch_body(
    account_id: &AccountId,
    record: &ProfileRecord,
) -> Result<serde_json::Value, BackendError> {
    let value = serde_json::to_value(record)
        .map_err(|e| BackendError::InvalidResponse(format!("serialize profile: {e}")))?;
    let mut body = serde_json::Map::new();
    body.insert(account_id.to_string(), value);
    Ok(serde_json::Value::Object(body))
}

#[async_trait]
impl ProfileStore for FirebaseDatabase {
    async fn upsert(
        &self,
        credential: &Credential,
        record: &ProfileRecord,
    ) -> Result<(), BackendError> {
        let account_id = credential.account_id();
        let body = profile_patch_body(account_id, record)?;
        let resp = self
            .client
            .patch(self.collection_url(credential)?)
            .json(&body)
            .send()
            .await?;
        ensure_success(resp).await?;
        info!(account_id = %account_id, collection = %self.collection, "Saved profile");
        Ok(())
    }
}
