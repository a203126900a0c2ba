//! Command-line front end: argument parsing and avatar loading.

use std::path::{Path, PathBuf};

use crate::error::InputError;
use crate::onboarding::form::FormInput;
use crate::onboarding::model::AvatarBlob;

pub const USAGE: &str = "usage: account-onboarding <email> <username> <password> [avatar-path]";

/// Parsed command-line arguments.
#[derive(Debug)]
pub struct SignupArgs {
    pub form: FormInput,
    pub avatar_path: Option<PathBuf>,
}

/// Parse positional arguments (program name already stripped).
///
/// Returns `None` on a wrong argument count. Empty fields are accepted here
/// and left to the form validator.
pub fn parse_args<I>(args: I) -> Option<SignupArgs>
where
    I: IntoIterator<Item = String>,
{
    let args: Vec<String> = args.into_iter().collect();
    match args.as_slice() {
        [email, username, password] => Some(SignupArgs {
            form: FormInput::new(email.as_str(), username.as_str(), password.as_str()),
            avatar_path: None,
        }),
        [email, username, password, avatar] => Some(SignupArgs {
            form: FormInput::new(email.as_str(), username.as_str(), password.as_str()),
            avatar_path: Some(PathBuf::from(avatar)),
        }),
        _ => None,
    }
}

/// Content type inferred from the file extension, defaulting to JPEG.
fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}

/// Read an avatar image from disk, tagging it with `quality`.
pub async fn load_avatar(path: &Path, quality: f32) -> Result<AvatarBlob, InputError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| InputError::AvatarUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(AvatarBlob::new(bytes)
        .with_content_type(content_type_for(path))
        .with_quality(quality))
}
