//! Master password and setup input checks.

use crate::{Error, Result};

pub const MIN_PASSWORD_CHARS: usize = 8;

/// At least eight characters with one letter and one digit.
pub fn validate_password(password: &str) -> Result<()> {
    if password.trim().is_empty() {
        return Err(Error::Validation("Master password is required".to_string()));
    }
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(Error::Validation(format!(
            "Master password must be at least {MIN_PASSWORD_CHARS} characters"
        )));
    }
    let has_letter = password.chars().any(char::is_alphabetic);
    let has_digit = password.chars().any(|ch| ch.is_ascii_digit());
    if !has_letter || !has_digit {
        return Err(Error::Validation(
            "Master password must contain a letter and a digit".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_token(token: &str) -> Result<()> {
    if token.trim().is_empty() {
        return Err(Error::Validation("Access token is required".to_string()));
    }
    Ok(())
}
