//! PBKDF2-HMAC-SHA256 key derivation and iteration calibration.

use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use super::cipher::{DataKey, KEY_LEN};
use super::{CryptoError, CryptoResult};

pub const KDF_ALGORITHM: &str = "PBKDF2";
pub const KDF_HASH: &str = "SHA-256";
pub const SALT_LEN: usize = 16;

const VERIFIER_CONTEXT: &[u8] = b"trace-diary/password-verifier/v1";

/// Parameters stored alongside the config so the key can be re-derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub algorithm: String,
    pub hash: String,
    pub iterations: u32,
    /// Base64-encoded salt.
    pub salt: String,
}

impl KdfParams {
    /// Fresh parameters with a random 16-byte salt.
    pub fn generate(iterations: u32) -> Self {
        Self::with_salt(iterations, &random_salt())
    }

    pub fn with_salt(iterations: u32, salt: &[u8]) -> Self {
        Self {
            algorithm: KDF_ALGORITHM.to_string(),
            hash: KDF_HASH.to_string(),
            iterations,
            salt: STANDARD.encode(salt),
        }
    }

    /// Check the parameters and return the decoded salt.
    pub fn validate(&self) -> CryptoResult<Vec<u8>> {
        if self.algorithm != KDF_ALGORITHM || self.hash != KDF_HASH {
            return Err(CryptoError::InvalidParams(format!(
                "{}/{}",
                self.algorithm, self.hash
            )));
        }
        if self.iterations == 0 {
            return Err(CryptoError::InvalidParams(
                "iterations must be positive".to_string(),
            ));
        }
        let salt = STANDARD
            .decode(self.salt.trim())
            .map_err(|error| CryptoError::InvalidParams(format!("salt: {error}")))?;
        if salt.is_empty() {
            return Err(CryptoError::InvalidParams(
                "salt must not be empty".to_string(),
            ));
        }
        Ok(salt)
    }
}

/// Derive the data key. Deterministic for identical password and params.
pub fn derive_key(password: &str, params: &KdfParams) -> CryptoResult<DataKey> {
    let salt = params.validate()?;
    Ok(derive_raw(password, &salt, params.iterations))
}

fn derive_raw(password: &str, salt: &[u8], iterations: u32) -> DataKey {
    let mut bytes = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut bytes);
    let key = DataKey::from_bytes(bytes);
    bytes.zeroize();
    key
}

/// One-way verifier for the master password, stored in the config.
///
/// It is a domain-separated digest of the derived key, so the key itself is
/// never persisted.
pub fn password_verifier(key: &DataKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(VERIFIER_CONTEXT);
    hasher.update(key.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Constant-time comparison of a key against a stored verifier.
pub fn verify_password(key: &DataKey, expected_verifier: &str) -> bool {
    let actual = password_verifier(key);
    actual
        .as_bytes()
        .ct_eq(expected_verifier.trim().as_bytes())
        .into()
}

fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Bounds for [`calibrate_kdf_params`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationOptions {
    pub target_min: Duration,
    pub target_max: Duration,
    pub min_iterations: u32,
    pub max_iterations: u32,
    pub initial_iterations: u32,
    pub max_attempts: u32,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            target_min: Duration::from_millis(200),
            target_max: Duration::from_millis(500),
            min_iterations: 150_000,
            max_iterations: 1_000_000,
            initial_iterations: 300_000,
            max_attempts: 8,
        }
    }
}

impl CalibrationOptions {
    fn validate(&self) -> CryptoResult<()> {
        if self.target_min.is_zero() || self.target_max < self.target_min {
            return Err(CryptoError::InvalidParams(
                "invalid target duration window".to_string(),
            ));
        }
        if self.min_iterations == 0 || self.max_iterations < self.min_iterations {
            return Err(CryptoError::InvalidParams(
                "invalid iteration range".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(CryptoError::InvalidParams(
                "max_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pick an iteration count that takes roughly the target time on this device.
///
/// Blocks the calling thread for up to `max_attempts` derivations.
pub fn calibrate_kdf_params(
    password: &str,
    options: &CalibrationOptions,
) -> CryptoResult<KdfParams> {
    if password.is_empty() {
        return Err(CryptoError::InvalidParams(
            "password must not be empty".to_string(),
        ));
    }
    let salt = random_salt();
    calibrate_with(options, &salt, |iterations| {
        let started = Instant::now();
        let _ = derive_raw(password, &salt, iterations);
        started.elapsed()
    })
}

/// Calibration with an injectable measurement, for deterministic callers.
pub fn calibrate_with<F>(
    options: &CalibrationOptions,
    salt: &[u8],
    mut measure: F,
) -> CryptoResult<KdfParams>
where
    F: FnMut(u32) -> Duration,
{
    options.validate()?;

    let min_ms = options.target_min.as_millis();
    let max_ms = options.target_max.as_millis();
    let mid_ms = (min_ms + max_ms) / 2;

    let mut iterations = options
        .initial_iterations
        .clamp(options.min_iterations, options.max_iterations);
    let mut measured_ms = measure(iterations).as_millis();

    for _ in 1..options.max_attempts {
        if (min_ms..=max_ms).contains(&measured_ms) {
            break;
        }

        let scaled = u128::from(iterations) * mid_ms / measured_ms.max(1);
        let mut next = clamp_iterations(scaled, options);

        if next == iterations {
            let step = (iterations / 10).max(1);
            next = if measured_ms < min_ms {
                iterations.saturating_add(step).min(options.max_iterations)
            } else {
                iterations.saturating_sub(step).max(options.min_iterations)
            };
        }
        if next == iterations {
            break;
        }

        iterations = next;
        measured_ms = measure(iterations).as_millis();
    }

    tracing::debug!(iterations, "Calibrated KDF iterations");
    Ok(KdfParams::with_salt(iterations, salt))
}

fn clamp_iterations(value: u128, options: &CalibrationOptions) -> u32 {
    let value = u32::try_from(value).unwrap_or(u32::MAX);
    value.clamp(options.min_iterations, options.max_iterations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TEST_ITERATIONS: u32 = 1_000;

    #[test]
    fn derive_key_is_deterministic() {
        let params = KdfParams::with_salt(TEST_ITERATIONS, &[5u8; SALT_LEN]);
        let first = derive_key("hunter2abc", &params).unwrap();
        let second = derive_key("hunter2abc", &params).unwrap();
        assert_eq!(first, second);

        let other = derive_key("hunter3abc", &params).unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn generated_params_use_fresh_salt() {
        let first = KdfParams::generate(TEST_ITERATIONS);
        let second = KdfParams::generate(TEST_ITERATIONS);
        assert_ne!(first.salt, second.salt);
        assert_eq!(first.validate().unwrap().len(), SALT_LEN);
        assert_eq!(first.algorithm, "PBKDF2");
        assert_eq!(first.hash, "SHA-256");
    }

    #[test]
    fn validate_rejects_unsupported_params() {
        let mut params = KdfParams::generate(TEST_ITERATIONS);
        params.hash = "SHA-1".to_string();
        assert!(params.validate().is_err());

        let mut params = KdfParams::generate(TEST_ITERATIONS);
        params.iterations = 0;
        assert!(params.validate().is_err());

        let mut params = KdfParams::generate(TEST_ITERATIONS);
        params.salt = String::new();
        assert!(params.validate().is_err());
    }

    #[test]
    fn verifier_matches_only_same_key() {
        let params = KdfParams::generate(TEST_ITERATIONS);
        let key = derive_key("correct1pass", &params).unwrap();
        let verifier = password_verifier(&key);

        assert!(verify_password(&key, &verifier));
        let wrong = derive_key("wrong1pass", &params).unwrap();
        assert!(!verify_password(&wrong, &verifier));
        assert!(!verify_password(&key, ""));
    }

    #[test]
    fn calibration_scales_toward_target_window() {
        // Simulated device: 1ms per 2000 iterations.
        let mut calls = Vec::new();
        let params = calibrate_with(&CalibrationOptions::default(), &[1u8; SALT_LEN], |it| {
            calls.push(it);
            Duration::from_millis(u64::from(it / 2000))
        })
        .unwrap();

        assert_eq!(calls[0], 300_000);
        assert_eq!(params.iterations, 700_000);
        assert_eq!(calls.len(), 2);
    }

    #[test]
    fn calibration_clamps_to_bounds() {
        let slow = calibrate_with(&CalibrationOptions::default(), &[1u8; SALT_LEN], |_| {
            Duration::from_secs(10)
        })
        .unwrap();
        assert_eq!(slow.iterations, 150_000);

        let fast = calibrate_with(&CalibrationOptions::default(), &[1u8; SALT_LEN], |_| {
            Duration::from_millis(1)
        })
        .unwrap();
        assert_eq!(fast.iterations, 1_000_000);
    }

    #[test]
    fn calibration_accepts_first_measurement_in_window() {
        let mut calls = 0;
        let params = calibrate_with(&CalibrationOptions::default(), &[1u8; SALT_LEN], |_| {
            calls += 1;
            Duration::from_millis(300)
        })
        .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(params.iterations, 300_000);
    }
}
