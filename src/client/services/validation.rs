use once_cell::sync::Lazy;
use regex::Regex;

use crate::common::error::{ChatError, ChatResult};

// hardcoded pattern, checked by the tests below
static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("hardcoded email regex is invalid")
});

pub fn is_valid_email(email: &str) -> bool {
    !email.is_empty() && email.len() <= 254 && EMAIL_REGEX.is_match(email)
}

/// The credential form as the auth screen submits it.
#[derive(Debug, Clone, Copy)]
pub struct Credentials<'a> {
    pub name: &'a str,
    pub birth_date: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

/// Checks the form before anything is sent. Registration additionally needs
/// a name and a birth date, which are checked first.
pub fn validate_credentials(form: Credentials<'_>, registering: bool, min_password_length: usize) -> ChatResult<()> {
    if registering && form.name.trim().is_empty() {
        return Err(ChatError::Validation("Name cannot be empty".to_string()));
    }
    if registering && form.birth_date.trim().is_empty() {
        return Err(ChatError::Validation("Birth date cannot be empty".to_string()));
    }
    if form.email.trim().is_empty() || !is_valid_email(form.email) {
        return Err(ChatError::Validation("Invalid email address".to_string()));
    }
    if form.password.chars().count() < min_password_length {
        return Err(ChatError::Validation(format!(
            "Password must be at least {} characters",
            min_password_length
        )));
    }
    Ok(())
}
