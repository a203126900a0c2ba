//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;
use crate::onboarding::model::{DEFAULT_AVATAR_NAMESPACE, DEFAULT_AVATAR_QUALITY};

/// Default database node holding profile records.
pub const DEFAULT_PROFILE_COLLECTION: &str = "users";

/// What to do when a run has no avatar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AvatarPolicy {
    /// Fail with `AvatarMissing` before any remote call.
    #[default]
    Required,
    /// Skip upload and URL resolution; persist an empty avatar URL.
    Optional,
}

impl std::str::FromStr for AvatarPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "required" => Ok(Self::Required),
            "optional" => Ok(Self::Optional),
            other => Err(ConfigError::InvalidValue {
                key: "ONBOARDING_AVATAR_POLICY".to_string(),
                message: format!("expected 'required' or 'optional', got '{other}'"),
            }),
        }
    }
}

/// Provisioning pipeline configuration.
#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    /// Namespace (folder) for avatar blobs.
    pub avatar_namespace: String,
    /// Compression quality hint attached to loaded avatars, `0.0..=1.0`.
    pub avatar_quality: f32,
    /// Collection the profile store writes under.
    pub profile_collection: String,
    pub avatar_policy: AvatarPolicy,
    /// Undo earlier stages (blob, then credential) when a later stage fails.
    pub compensate_on_failure: bool,
    /// Upper bound for each remote call. `None` waits indefinitely.
    pub stage_timeout: Option<Duration>,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            avatar_namespace: DEFAULT_AVATAR_NAMESPACE.to_string(),
            avatar_quality: DEFAULT_AVATAR_QUALITY,
            profile_collection: DEFAULT_PROFILE_COLLECTION.to_string(),
            avatar_policy: AvatarPolicy::Required,
            compensate_on_failure: false,
            stage_timeout: None,
        }
    }
}

impl ProvisioningConfig {
    /// Defaults overridden by `ONBOARDING_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (environment, file, test map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ns) = lookup("ONBOARDING_AVATAR_NAMESPACE").filter(|s| !s.is_empty()) {
            config.avatar_namespace = ns;
        }
        if let Some(quality) = lookup("ONBOARDING_AVATAR_QUALITY") {
            config.avatar_quality = parse_quality(&quality)?;
        }
        if let Some(collection) = lookup("ONBOARDING_PROFILE_COLLECTION").filter(|s| !s.is_empty())
        {
            config.profile_collection = collection;
        }
        if let Some(policy) = lookup("ONBOARDING_AVATAR_POLICY") {
            config.avatar_policy = policy.parse()?;
        }
        if let Some(flag) = lookup("ONBOARDING_COMPENSATE") {
            config.compensate_on_failure = parse_bool("ONBOARDING_COMPENSATE", &flag)?;
        }
        if let Some(secs) = lookup("ONBOARDING_STAGE_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|e| ConfigError::InvalidValue {
                key: "ONBOARDING_STAGE_TIMEOUT_SECS".to_string(),
                message: format!("{e}"),
            })?;
            // 0 disables the timeout
            config.stage_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        Ok(config)
    }

    pub fn with_avatar_policy(mut self, policy: AvatarPolicy) -> Self {
        self.avatar_policy = policy;
        self
    }

    pub fn with_compensation(mut self, enabled: bool) -> Self {
        self.compensate_on_failure = enabled;
        self
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = Some(timeout);
        self
    }
}

fn parse_quality(value: &str) -> Result<f32, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: "ONBOARDING_AVATAR_QUALITY".to_string(),
        message,
    };
    let quality: f32 = value.trim().parse().map_err(|e| invalid(format!("{e}")))?;
    if !(0.0..=1.0).contains(&quality) {
        return Err(invalid(format!("expected 0.0 to 1.0, got {quality}")));
    }
    Ok(quality)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}
