//! Sign-up onboarding: form check and account provisioning.
//!
//! The presentation layer hands over a `FormInput` and an optional
//! `AvatarBlob`. `FormValidator` gates submission; the
//! `AccountProvisioningPipeline` creates the credential, stores the avatar,
//! and writes the profile, returning a `PipelineResult`.

pub mod form;
pub mod model;
pub mod pipeline;
pub mod stage;

pub use form::{FormField, FormInput, FormValidator};
pub use model::{
    AccountId, AvatarBlob, BlobKey, Credential, PipelineResult, ProfileRecord, StorageHandle,
};
pub use pipeline::AccountProvisioningPipeline;
pub use stage::Stage;
