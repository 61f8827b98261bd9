use super::types::UserInfo;
use chrono::{DateTime, Utc};
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Lifecycle of one token authenticator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AuthenticationState {
    /// Settings validated, no identity-provider handle yet
    #[default]
    Uninitialized,
    /// Handle built, no token acquired
    Initialized,
    /// A token was acquired (silently or interactively) and cached
    Authenticated,
    /// The cached token is inside the refresh buffer and is being renewed
    Stale,
    /// The cached token was replaced by a silent refresh
    Refreshed,
    /// The cached token and account session were discarded
    SignedOut,
}

impl AuthenticationState {
    pub fn has_token(self) -> bool {
        matches!(
            self,
            AuthenticationState::Authenticated
                | AuthenticationState::Stale
                | AuthenticationState::Refreshed
        )
    }
}

/// Discrete state changes published to observers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CredentialEvent {
    Authenticated(UserInfo),
    TokenRefreshed {
        username: String,
        expires_on: DateTime<Utc>,
    },
    SignedOut {
        username: String,
    },
}

/// Current state plus a broadcast channel of transitions.
///
/// Each subscriber gets its own receiver; one that lags or is dropped does
/// not hold up the others or the authenticator.
pub(crate) struct StateTracker {
    state: RwLock<AuthenticationState>,
    events: broadcast::Sender<CredentialEvent>,
}

impl StateTracker {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(AuthenticationState::Uninitialized),
            events,
        }
    }

    pub(crate) fn get(&self) -> AuthenticationState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set(&self, state: AuthenticationState) {
        let mut current = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *current != state {
            log::debug!("Authentication state {current:?} -> {state:?}");
            *current = state;
        }
    }

    /// Moves to `Initialized`, unless a later state has already been reached.
    pub(crate) fn mark_initialized(&self) {
        let mut current = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *current == AuthenticationState::Uninitialized {
            *current = AuthenticationState::Initialized;
        }
    }

    pub(crate) fn transition(&self, state: AuthenticationState, event: CredentialEvent) {
        self.set(state);
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<CredentialEvent> {
        self.events.subscribe()
    }
}
