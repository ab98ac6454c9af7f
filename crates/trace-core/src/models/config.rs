//! Persisted app configuration and lock state.

use serde::{Deserialize, Serialize};

use crate::crypto::KdfParams;

/// Configuration created at first-time setup.
///
/// The access token is only ever stored encrypted under the data key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub kdf_params: KdfParams,
    pub encrypted_token: Option<String>,
    /// Bumped every time the token is re-encrypted.
    pub token_cipher_version: u32,
    /// One-way verifier of the master password.
    pub password_hash: String,
    /// Unix ms after which the password must be entered again.
    pub password_expiry: i64,
}

impl AppConfig {
    /// `owner/repo` display form.
    pub fn repository(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    pub const fn is_expired(&self, now_ms: i64) -> bool {
        self.password_expiry <= now_ms
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .field("kdf_params", &self.kdf_params)
            .field(
                "encrypted_token",
                &self.encrypted_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_cipher_version", &self.token_cipher_version)
            .field("password_hash", &"[REDACTED]")
            .field("password_expiry", &self.password_expiry)
            .finish()
    }
}

/// Persisted lock flag. The decrypted token itself is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum LockState {
    Locked,
    Unlocked {
        #[serde(rename = "expiresAt")]
        expires_at: i64,
    },
}

impl LockState {
    pub const fn is_unlocked_at(&self, now_ms: i64) -> bool {
        match self {
            Self::Locked => false,
            Self::Unlocked { expires_at } => *expires_at > now_ms,
        }
    }
}
