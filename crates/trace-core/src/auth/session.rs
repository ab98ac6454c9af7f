//! Session manager: runs the side effects behind each auth transition.

use std::fmt;
use std::future::Future;
use std::sync::{PoisonError, RwLock};

use zeroize::Zeroizing;

use super::policy::{validate_password, validate_token};
use super::state::{try_transition, AuthEvent, AuthState, RefreshReason};
use super::KeyProvider;
use crate::config::{KdfStrategy, SessionOptions, DEFAULT_BRANCH};
use crate::crypto::{
    calibrate_kdf_params, decrypt, derive_key, encrypt, password_verifier, verify_password,
    DataKey, KdfParams,
};
use crate::models::{AppConfig, LockState};
use crate::remote::{RemoteResult, RepoRef};
use crate::services::LocalStore;
use crate::util::{normalize_text_option, now_ms};
use crate::{Error, Result};

/// Unlocked key and token, held only in memory.
#[derive(Clone)]
pub struct Session {
    key: DataKey,
    token: Zeroizing<String>,
    expires_at: i64,
}

impl Session {
    pub const fn key(&self) -> &DataKey {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub const fn expires_at(&self) -> i64 {
        self.expires_at
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Session")
            .field("key", &"[REDACTED]")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// First-time setup input.
#[derive(Clone)]
pub struct SetupRequest {
    /// `owner/repo` or a repository URL.
    pub repository: String,
    pub branch: Option<String>,
    pub token: String,
    pub password: String,
}

impl fmt::Debug for SetupRequest {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SetupRequest")
            .field("repository", &self.repository)
            .field("branch", &self.branch)
            .field("token", &"[REDACTED]")
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Confirms a decrypted token is still accepted by the remote.
pub trait AccessVerifier: Send + Sync {
    fn verify(
        &self,
        config: &AppConfig,
        token: &str,
    ) -> impl Future<Output = RemoteResult<()>> + Send;
}

/// Verifier used when unlocking offline.
struct SkipVerification;

impl AccessVerifier for SkipVerification {
    async fn verify(&self, _config: &AppConfig, _token: &str) -> RemoteResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Inner {
    state: AuthState,
    session: Option<Session>,
    /// Key proven by the password verifier while the token is unusable.
    pending_key: Option<DataKey>,
}

/// Owns the auth state value and the in-memory session.
pub struct SessionManager {
    store: LocalStore,
    options: SessionOptions,
    inner: RwLock<Inner>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SessionManager")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(store: LocalStore, options: SessionOptions) -> Self {
        Self {
            store,
            options,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn state(&self) -> AuthState {
        self.read(|inner| inner.state)
    }

    pub fn session(&self) -> Option<Session> {
        self.read(|inner| inner.session.clone())
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    fn read<T>(&self, f: impl FnOnce(&Inner) -> T) -> T {
        f(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Move to the state `event` leads to and run `update` under the same
    /// lock. An event that does not apply fails and leaves everything as is.
    fn apply(&self, event: AuthEvent, update: impl FnOnce(&mut Inner)) -> Result<AuthState> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let current = inner.state;
        let next = try_transition(&current, event).ok_or_else(|| rejected(event, current))?;
        update(&mut inner);
        if next != current {
            tracing::info!("Auth state {} -> {}", current.label(), next.label());
        }
        inner.state = next;
        Ok(next)
    }

    /// Fail early, before any storage work, when `event` cannot apply.
    fn ensure_accepts(&self, event: AuthEvent) -> Result<()> {
        let state = self.state();
        try_transition(&state, event)
            .map(|_| ())
            .ok_or_else(|| rejected(event, state))
    }

    /// Run [`Self::bootstrap`] if the startup state has not been settled yet.
    async fn settle(&self) -> Result<AuthState> {
        match self.state() {
            AuthState::Checking => self.bootstrap().await,
            state => Ok(state),
        }
    }

    /// Inspect persisted config and settle the startup state.
    pub async fn bootstrap(&self) -> Result<AuthState> {
        {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            inner.state = AuthState::Checking;
        }

        let Some(config) = self.store.load_config().await? else {
            return self.apply(AuthEvent::ConfigMissing, |_| {});
        };

        let now = now_ms();
        let lock = self.store.lock_state().await?;
        let lock_live = lock.is_unlocked_at(now) && !config.is_expired(now);
        let restorable = lock_live
            && self.read(|inner| {
                inner
                    .session
                    .as_ref()
                    .is_some_and(|session| session.expires_at > now)
            });

        if restorable {
            return self.apply(AuthEvent::SessionRestored, |_| {});
        }
        if !lock_live && matches!(lock, LockState::Unlocked { .. }) {
            self.store.save_lock_state(LockState::Locked).await?;
        }
        self.apply(AuthEvent::ConfigLocked, |inner| {
            inner.session = None;
            inner.pending_key = None;
        })
    }

    /// First-time setup. Fails without transitioning on invalid input.
    pub async fn setup(&self, request: SetupRequest) -> Result<Session> {
        let repo = RepoRef::parse(&request.repository)?;
        validate_token(&request.token)?;
        validate_password(&request.password)?;
        self.settle().await?;
        if self.store.load_config().await?.is_some() {
            return Err(Error::Validation(
                "Diary is already configured; unlock or refresh the token instead".to_string(),
            ));
        }
        self.ensure_accepts(AuthEvent::SetupCompleted)?;

        let password = Zeroizing::new(request.password);
        let params = self.new_kdf_params(&password).await?;
        let key = derive_blocking(&password, &params).await?;

        let token = Zeroizing::new(request.token.trim().to_string());
        let expires_at = now_ms().saturating_add(self.options.lock_window_ms());
        let config = AppConfig {
            owner: repo.owner,
            repo: repo.repo,
            branch: normalize_text_option(request.branch)
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            kdf_params: params,
            encrypted_token: Some(encrypt(&token, &key)?),
            token_cipher_version: 1,
            password_hash: password_verifier(&key),
            password_expiry: expires_at,
        };
        self.store.save_config(&config).await?;
        self.store
            .save_lock_state(LockState::Unlocked { expires_at })
            .await?;

        let session = Session {
            key,
            token,
            expires_at,
        };
        let stored = session.clone();
        self.apply(AuthEvent::SetupCompleted, move |inner| {
            inner.session = Some(stored);
            inner.pending_key = None;
        })?;
        tracing::info!("Configured backup repository {}", config.repository());
        Ok(session)
    }

    /// Unlock with the master password without asking the remote about the token.
    pub async fn unlock(&self, password: &str) -> Result<AuthState> {
        self.unlock_with(password, &SkipVerification).await
    }

    /// Unlock and confirm the token with `verifier`.
    ///
    /// A wrong password is an [`Error::Auth`] and leaves the state unchanged.
    /// A correct password with an unusable token moves to
    /// [`AuthState::NeedsTokenRefresh`].
    pub async fn unlock_with<V: AccessVerifier>(
        &self,
        password: &str,
        verifier: &V,
    ) -> Result<AuthState> {
        if password.is_empty() {
            return Err(Error::Validation("Master password is required".to_string()));
        }
        self.settle().await?;
        let mut config = self.require_config().await?;
        self.ensure_accepts(AuthEvent::Unlocked)?;
        let key = self.verified_key(&config, password).await?;

        let Some(envelope) = config.encrypted_token.as_deref() else {
            return self.reject_token(key, RefreshReason::MissingToken);
        };
        let token = match decrypt(envelope, &key) {
            Ok(token) => Zeroizing::new(token),
            Err(_) => {
                tracing::warn!("Stored access token could not be decrypted");
                return self.reject_token(key, RefreshReason::DecryptFailed);
            }
        };

        match verifier.verify(&config, &token).await {
            Ok(()) => {}
            Err(error) if error.is_unauthorized() => {
                tracing::warn!("Remote rejected the stored access token: {error}");
                return self.reject_token(key, RefreshReason::TokenInvalid);
            }
            Err(error) => {
                tracing::warn!("Could not confirm access token, continuing offline: {error}");
            }
        }

        let expires_at = now_ms().saturating_add(self.options.lock_window_ms());
        config.password_expiry = expires_at;
        self.store.save_config(&config).await?;
        self.store
            .save_lock_state(LockState::Unlocked { expires_at })
            .await?;

        let session = Session {
            key,
            token,
            expires_at,
        };
        self.apply(AuthEvent::Unlocked, move |inner| {
            inner.session = Some(session);
            inner.pending_key = None;
        })
    }

    /// Replace the access token, re-encrypting it under the data key.
    ///
    /// Uses the key already held in memory; otherwise `password` is required.
    pub async fn refresh_token(&self, token: &str, password: Option<&str>) -> Result<Session> {
        validate_token(token)?;
        self.settle().await?;
        let mut config = self.require_config().await?;
        self.ensure_accepts(AuthEvent::TokenRefreshed)?;

        let held = self.read(|inner| {
            inner
                .pending_key
                .clone()
                .or_else(|| inner.session.as_ref().map(|session| session.key.clone()))
        });
        let key = match (held, password) {
            (Some(key), _) => key,
            (None, Some(password)) => self.verified_key(&config, password).await?,
            (None, None) => {
                return Err(Error::Auth(
                    "Master password is required to store a new token".to_string(),
                ));
            }
        };

        let token = Zeroizing::new(token.trim().to_string());
        let expires_at = now_ms().saturating_add(self.options.lock_window_ms());
        config.encrypted_token = Some(encrypt(&token, &key)?);
        config.token_cipher_version = config.token_cipher_version.saturating_add(1);
        config.password_expiry = expires_at;
        self.store.save_config(&config).await?;
        self.store
            .save_lock_state(LockState::Unlocked { expires_at })
            .await?;

        let session = Session {
            key,
            token,
            expires_at,
        };
        let stored = session.clone();
        self.apply(AuthEvent::TokenRefreshed, move |inner| {
            inner.session = Some(stored);
            inner.pending_key = None;
        })?;
        tracing::info!(
            version = config.token_cipher_version,
            "Access token re-encrypted"
        );
        Ok(session)
    }

    /// Periodic check: a `Ready` session past its expiry drops back to
    /// `NeedsUnlock`. Config is kept.
    pub async fn check_expiry(&self, now: i64) -> Result<AuthState> {
        if !self.state().is_ready() {
            return Ok(self.state());
        }
        let config_expired = self
            .store
            .load_config()
            .await?
            .is_none_or(|config| config.is_expired(now));
        let session_expired = self.read(|inner| {
            inner
                .session
                .as_ref()
                .is_none_or(|session| session.expires_at <= now)
        });
        if !config_expired && !session_expired {
            return Ok(AuthState::Ready);
        }

        tracing::info!("Master password expired; locking");
        self.store.save_lock_state(LockState::Locked).await?;
        self.apply(AuthEvent::Expired, |inner| {
            inner.session = None;
            inner.pending_key = None;
        })
    }

    /// Drop the in-memory session and persist a locked state.
    pub async fn lock_now(&self) -> Result<AuthState> {
        self.settle().await?;
        self.ensure_accepts(AuthEvent::LockRequested)?;
        self.store.save_lock_state(LockState::Locked).await?;
        self.apply(AuthEvent::LockRequested, |inner| {
            inner.session = None;
            inner.pending_key = None;
        })
    }

    /// Record that the remote rejected the token during normal use. The key
    /// stays available to [`Self::refresh_token`] but no longer to sync.
    pub fn mark_token_rejected(&self) -> Result<AuthState> {
        self.apply(
            AuthEvent::TokenRejected(RefreshReason::TokenInvalid),
            |inner| {
                if let Some(session) = inner.session.take() {
                    inner.pending_key = Some(session.key);
                }
            },
        )
    }

    async fn require_config(&self) -> Result<AppConfig> {
        self.store
            .load_config()
            .await?
            .ok_or_else(|| Error::Auth("Diary is not set up yet".to_string()))
    }

    async fn verified_key(&self, config: &AppConfig, password: &str) -> Result<DataKey> {
        let key = derive_blocking(password, &config.kdf_params).await?;
        if !verify_password(&key, &config.password_hash) {
            return Err(Error::Auth("Incorrect master password".to_string()));
        }
        Ok(key)
    }

    fn reject_token(&self, key: DataKey, reason: RefreshReason) -> Result<AuthState> {
        self.apply(AuthEvent::TokenRejected(reason), move |inner| {
            inner.session = None;
            inner.pending_key = Some(key);
        })
    }

    async fn new_kdf_params(&self, password: &str) -> Result<KdfParams> {
        match &self.options.kdf {
            KdfStrategy::Fixed(iterations) => Ok(KdfParams::generate(*iterations)),
            KdfStrategy::Calibrate(options) => {
                let password = Zeroizing::new(password.to_string());
                let options = options.clone();
                let params = tokio::task::spawn_blocking(move || {
                    calibrate_kdf_params(&password, &options)
                })
                .await
                .map_err(|error| Error::Auth(format!("KDF calibration was interrupted: {error}")))??;
                Ok(params)
            }
        }
    }
}

impl KeyProvider for SessionManager {
    fn data_key(&self) -> Option<DataKey> {
        self.read(|inner| inner.session.as_ref().map(|session| session.key.clone()))
    }

    fn credentials_rejected(&self) {
        match self.mark_token_rejected() {
            Ok(state) => tracing::warn!("Remote rejected the access token; now {}", state.label()),
            Err(error) => tracing::debug!("Token rejection ignored: {error}"),
        }
    }
}

fn rejected(event: AuthEvent, state: AuthState) -> Error {
    Error::Auth(format!("{event:?} is not allowed while {}", state.label()))
}

/// Derive off the async runtime; PBKDF2 takes hundreds of milliseconds.
async fn derive_blocking(password: &str, params: &KdfParams) -> Result<DataKey> {
    let password = Zeroizing::new(password.to_string());
    let params = params.clone();
    let key = tokio::task::spawn_blocking(move || derive_key(&password, &params))
        .await
        .map_err(|error| Error::Auth(format!("Key derivation was interrupted: {error}")))??;
    Ok(key)
}
