//! Account onboarding: sign-up form check and account provisioning.

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod onboarding;
