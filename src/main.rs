use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;

use account_onboarding::backend::{
    BlobStore, CredentialService, FirebaseAuth, FirebaseConfig, FirebaseDatabase,
    FirebaseStorage, InMemoryBlobStore, InMemoryCredentialService, InMemoryProfileStore,
    ProfileStore,
};
use account_onboarding::cli::{self, USAGE};
use account_onboarding::config::ProvisioningConfig;
use account_onboarding::onboarding::{AccountProvisioningPipeline, FormValidator};

type Backends = (
    Arc<dyn CredentialService>,
    Arc<dyn BlobStore>,
    Arc<dyn ProfileStore>,
);

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let Some(args) = cli::parse_args(std::env::args().skip(1)) else {
        eprintln!("{USAGE}");
        return Ok(ExitCode::from(2));
    };

    // Presentation would keep the submit control disabled; report instead.
    let missing = FormValidator::missing_fields(&args.form);
    if !missing.is_empty() {
        let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
        eprintln!("Form incomplete: missing {}", names.join(", "));
        return Ok(ExitCode::from(1));
    }

    let config = ProvisioningConfig::from_env().context("read provisioning config")?;

    // An unreadable avatar is bad input, same as an incomplete form.
    let avatar = match &args.avatar_path {
        Some(path) => match cli::load_avatar(path, config.avatar_quality).await {
            Ok(avatar) => Some(avatar),
            Err(e) => {
                eprintln!("{e}");
                return Ok(ExitCode::from(1));
            }
        },
        None => None,
    };

    let (credentials, blobs, profiles) = build_backends(&config)?;
    let pipeline = AccountProvisioningPipeline::new(credentials, blobs, profiles, config);

    match pipeline.run(&args.form, avatar).await {
        Ok(record) => {
            let output = serde_json::json!({
                "account_id": record.account_id,
                "username": record.username,
                "profileImageUrl": record.avatar_url,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("Sign-up failed: {e}");
            if let Some(account_id) = e.orphaned_account() {
                eprintln!("   Account {account_id} was created but has no profile");
            }
            Ok(ExitCode::from(1))
        }
    }
}

/// Firebase when `FIREBASE_API_KEY` is set, in-memory otherwise.
fn build_backends(config: &ProvisioningConfig) -> anyhow::Result<Backends> {
    let Some(firebase) = FirebaseConfig::from_env() else {
        tracing::warn!("FIREBASE_API_KEY not set; using in-memory backends");
        let credentials: Arc<dyn CredentialService> = Arc::new(InMemoryCredentialService::new());
        let blobs: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::default());
        let profiles: Arc<dyn ProfileStore> = Arc::new(InMemoryProfileStore::new());
        return Ok((credentials, blobs, profiles));
    };

    let firebase = firebase.context("read Firebase config")?;
    eprintln!("   Backend: Firebase (bucket: {})", firebase.storage_bucket);

    let client = reqwest::Client::new();
    let credentials: Arc<dyn CredentialService> =
        Arc::new(FirebaseAuth::with_client(client.clone(), &firebase));
    let blobs: Arc<dyn BlobStore> = Arc::new(FirebaseStorage::with_client(client.clone(), &firebase));
    let profiles: Arc<dyn ProfileStore> = Arc::new(FirebaseDatabase::with_client(
        client,
        &firebase,
        config.profile_collection.clone(),
    ));
    Ok((credentials, blobs, profiles))
}
