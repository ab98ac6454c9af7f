//! Setup, unlock and token lifecycle.
//!
//! [`transition`] is the pure state function; [`SessionManager`] performs the
//! storage and crypto work for each event and owns the resulting state.

mod policy;
mod session;
mod state;

pub use policy::{validate_password, validate_token, MIN_PASSWORD_CHARS};
pub use session::{AccessVerifier, Session, SessionManager, SetupRequest};
pub use state::{transition, try_transition, AuthEvent, AuthState, RefreshReason};

use std::sync::Arc;

use crate::crypto::DataKey;

/// Source of the active data key for components that encrypt or decrypt.
pub trait KeyProvider: Send + Sync + 'static {
    /// The key of the unlocked session, if any.
    fn data_key(&self) -> Option<DataKey>;

    /// Called when the remote refuses the access token mid-sync.
    fn credentials_rejected(&self) {}
}

impl KeyProvider for DataKey {
    fn data_key(&self) -> Option<DataKey> {
        Some(self.clone())
    }
}

impl<T: KeyProvider + ?Sized> KeyProvider for Arc<T> {
    fn data_key(&self) -> Option<DataKey> {
        (**self).data_key()
    }

    fn credentials_rejected(&self) {
        (**self).credentials_rejected();
    }
}
