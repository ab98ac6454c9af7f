//! Auth stages and their pure transition function.

use serde::Serialize;

/// Why the stored access token has to be replaced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshReason {
    /// The password was right but the token envelope did not decrypt.
    DecryptFailed,
    /// The remote rejected the token.
    TokenInvalid,
    /// Config has no encrypted token.
    MissingToken,
}

/// Where the app is in its setup/unlock lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case", tag = "stage", content = "reason")]
pub enum AuthState {
    /// Persisted config has not been inspected yet.
    #[default]
    Checking,
    /// No config; repository, token and a new password are needed.
    NeedsSetup,
    /// Config exists but no unlocked session is held.
    NeedsUnlock,
    /// The key is known but the token is unusable.
    NeedsTokenRefresh(RefreshReason),
    /// Key and token resident in memory.
    Ready,
}

impl AuthState {
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Self::Checking => "checking",
            Self::NeedsSetup => "needs-setup",
            Self::NeedsUnlock => "needs-unlock",
            Self::NeedsTokenRefresh(_) => "needs-token-refresh",
            Self::Ready => "ready",
        }
    }
}

/// Things that happen to the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthEvent {
    ConfigMissing,
    /// Config found but no live session can be restored.
    ConfigLocked,
    /// Config found and the in-memory session is still valid.
    SessionRestored,
    SetupCompleted,
    Unlocked,
    TokenRejected(RefreshReason),
    TokenRefreshed,
    /// The password expiry passed.
    Expired,
    LockRequested,
}

/// The state `event` leads to, or `None` when the event does not apply in
/// `state`.
#[must_use]
pub const fn try_transition(state: &AuthState, event: AuthEvent) -> Option<AuthState> {
    let next = match (*state, event) {
        (AuthState::Checking, AuthEvent::ConfigMissing) => AuthState::NeedsSetup,
        (AuthState::Checking, AuthEvent::ConfigLocked)
        | (AuthState::Ready, AuthEvent::Expired)
        | (
            AuthState::Ready | AuthState::NeedsTokenRefresh(_) | AuthState::NeedsUnlock,
            AuthEvent::LockRequested,
        ) => AuthState::NeedsUnlock,
        (AuthState::Checking, AuthEvent::SessionRestored)
        | (AuthState::NeedsSetup, AuthEvent::SetupCompleted)
        | (
            AuthState::NeedsUnlock | AuthState::NeedsTokenRefresh(_) | AuthState::Ready,
            AuthEvent::Unlocked,
        )
        | (
            AuthState::NeedsTokenRefresh(_) | AuthState::NeedsUnlock | AuthState::Ready,
            AuthEvent::TokenRefreshed,
        ) => AuthState::Ready,
        (
            AuthState::NeedsUnlock | AuthState::Ready | AuthState::NeedsTokenRefresh(_),
            AuthEvent::TokenRejected(reason),
        ) => AuthState::NeedsTokenRefresh(reason),
        _ => return None,
    };
    Some(next)
}

/// Deterministic auth state transition. Events that do not apply leave the
/// state unchanged.
#[must_use]
pub const fn transition(state: &AuthState, event: AuthEvent) -> AuthState {
    match try_transition(state, event) {
        Some(next) => next,
        None => *state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn startup_paths() {
        let checking = AuthState::Checking;
        assert_eq!(
            transition(&checking, AuthEvent::ConfigMissing),
            AuthState::NeedsSetup
        );
        assert_eq!(
            transition(&checking, AuthEvent::ConfigLocked),
            AuthState::NeedsUnlock
        );
        assert_eq!(
            transition(&checking, AuthEvent::SessionRestored),
            AuthState::Ready
        );
    }

    #[test]
    fn unlock_paths() {
        let locked = AuthState::NeedsUnlock;
        assert_eq!(transition(&locked, AuthEvent::Unlocked), AuthState::Ready);
        assert_eq!(
            transition(
                &locked,
                AuthEvent::TokenRejected(RefreshReason::DecryptFailed)
            ),
            AuthState::NeedsTokenRefresh(RefreshReason::DecryptFailed)
        );
        assert_eq!(
            transition(
                &AuthState::NeedsTokenRefresh(RefreshReason::DecryptFailed),
                AuthEvent::TokenRefreshed
            ),
            AuthState::Ready
        );
    }

    #[test]
    fn ready_expires_back_to_unlock() {
        assert_eq!(
            transition(&AuthState::Ready, AuthEvent::Expired),
            AuthState::NeedsUnlock
        );
        assert_eq!(
            transition(&AuthState::Ready, AuthEvent::LockRequested),
            AuthState::NeedsUnlock
        );
    }

    #[test]
    fn unrelated_events_do_not_transition() {
        assert_eq!(
            transition(&AuthState::NeedsSetup, AuthEvent::Unlocked),
            AuthState::NeedsSetup
        );
        assert_eq!(
            transition(&AuthState::NeedsUnlock, AuthEvent::Expired),
            AuthState::NeedsUnlock
        );
        assert_eq!(
            transition(&AuthState::Ready, AuthEvent::SetupCompleted),
            AuthState::Ready
        );
        assert_eq!(
            transition(&AuthState::NeedsSetup, AuthEvent::LockRequested),
            AuthState::NeedsSetup
        );
    }

    #[test]
    fn rejected_events_are_reported() {
        assert_eq!(try_transition(&AuthState::Checking, AuthEvent::SetupCompleted), None);
        assert_eq!(try_transition(&AuthState::Checking, AuthEvent::Unlocked), None);
        assert_eq!(try_transition(&AuthState::NeedsUnlock, AuthEvent::Expired), None);
        assert_eq!(
            try_transition(&AuthState::NeedsUnlock, AuthEvent::LockRequested),
            Some(AuthState::NeedsUnlock)
        );
    }

    #[test]
    fn token_refresh_stage_can_unlock_or_be_rejected_again() {
        let stale = AuthState::NeedsTokenRefresh(RefreshReason::DecryptFailed);
        assert_eq!(transition(&stale, AuthEvent::Unlocked), AuthState::Ready);
        assert_eq!(
            transition(&stale, AuthEvent::TokenRejected(RefreshReason::TokenInvalid)),
            AuthState::NeedsTokenRefresh(RefreshReason::TokenInvalid)
        );
    }

    #[test]
    fn serializes_with_stage_tag() {
        let json = serde_json::to_value(AuthState::NeedsTokenRefresh(
            RefreshReason::TokenInvalid,
        ))
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "stage": "needs_token_refresh", "reason": "token_invalid" })
        );
    }
}
