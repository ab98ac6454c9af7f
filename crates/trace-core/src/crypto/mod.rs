//! Password-based key derivation and authenticated encryption.
//!
//! One key, derived from the master password, protects diary content, the
//! remote metadata index and the stored access token. Nothing here touches
//! storage or the network.

mod cipher;
mod kdf;

pub use cipher::{decrypt, encrypt, DataKey, KEY_LEN, NONCE_LEN};
pub use kdf::{
    calibrate_kdf_params, calibrate_with, derive_key, password_verifier, verify_password,
    CalibrationOptions, KdfParams, KDF_ALGORITHM, KDF_HASH, SALT_LEN,
};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Wrong key, or the envelope was corrupted or tampered with.
    #[error("Decryption failed: wrong key or corrupted data")]
    Decrypt,
    #[error("Encryption failed")]
    Encrypt,
    #[error("Unsupported KDF parameters: {0}")]
    InvalidParams(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
