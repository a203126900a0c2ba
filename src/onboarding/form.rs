//! Sign-up form input and its validity check.

use secrecy::{ExposeSecret, SecretString};

/// The three text fields of the sign-up form.
#[derive(Debug, Clone)]
pub struct FormInput {
    pub email: String,
    pub username: String,
    pub password: SecretString,
}

impl FormInput {
    pub fn new(
        email: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }
}

/// A field of the sign-up form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    Email,
    Username,
    Password,
}

impl std::fmt::Display for FormField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Email => write!(f, "email"),
            Self::Username => write!(f, "username"),
            Self::Password => write!(f, "password"),
        }
    }
}

/// Stateless form check. Re-evaluated on every edit; holds no memory.
pub struct FormValidator;

impl FormValidator {
    /// True iff email, username, and password are all non-empty.
    pub fn is_valid(form: &FormInput) -> bool {
        Self::missing_fields(form).is_empty()
    }

    /// The empty fields, in form order.
    pub fn missing_fields(form: &FormInput) -> Vec<FormField> {
        let mut missing = Vec::new();
        if form.email.is_empty() {
            missing.push(FormField::Email);
        }
        if form.username.is_empty() {
            missing.push(FormField::Username);
        }
        if form.password.expose_secret().is_empty() {
            missing.push(FormField::Password);
        }
        missing
    }
}
