//! Identity provider seam.
//!
//! The provider owns the session. It announces every change (sign-in,
//! sign-out, session invalidation) on a `watch` channel that the session store
//! subscribes to once at startup.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::principal::SessionIdentity;
use crate::session::SessionError;

/// Identity state as announced by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// The provider has not reported yet (process start).
    Resolving,
    SignedOut,
    SignedIn(SessionIdentity),
}

impl AuthState {
    pub fn identity(&self) -> Option<&SessionIdentity> {
        match self {
            AuthState::SignedIn(identity) => Some(identity),
            AuthState::Resolving | AuthState::SignedOut => None,
        }
    }
}

/// External identity providers reachable through a popup flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PopupProvider {
    Google,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SessionIdentity, SessionError>;

    async fn sign_in_with_popup(
        &self,
        provider: PopupProvider,
    ) -> Result<SessionIdentity, SessionError>;

    async fn sign_out(&self) -> Result<(), SessionError>;

    /// Subscribe to identity changes. The receiver starts at the current state.
    fn subscribe(&self) -> watch::Receiver<AuthState>;
}

/// In-memory identity provider for tests/dev.
#[derive(Debug)]
pub struct InMemoryIdentityProvider {
    accounts: Mutex<HashMap<String, (String, SessionIdentity)>>,
    popup_accounts: Mutex<HashMap<PopupProvider, SessionIdentity>>,
    state: watch::Sender<AuthState>,
}

impl InMemoryIdentityProvider {
    /// A provider that has not yet reported the restored session.
    pub fn new() -> Self {
        let (state, _) = watch::channel(AuthState::Resolving);
        Self {
            accounts: Mutex::new(HashMap::new()),
            popup_accounts: Mutex::new(HashMap::new()),
            state,
        }
    }

    pub fn with_account(self, identity: SessionIdentity, password: impl Into<String>) -> Self {
        if let Ok(mut accounts) = self.accounts.lock() {
            accounts.insert(identity.email.clone(), (password.into(), identity));
        }
        self
    }

    pub fn with_popup_account(self, provider: PopupProvider, identity: SessionIdentity) -> Self {
        if let Ok(mut popup) = self.popup_accounts.lock() {
            popup.insert(provider, identity);
        }
        self
    }

    /// Report the session restored at startup (`None` when nobody was signed in).
    pub fn restore(&self, identity: Option<SessionIdentity>) {
        self.announce(match identity {
            Some(identity) => AuthState::SignedIn(identity),
            None => AuthState::SignedOut,
        });
    }

    /// Simulate the provider revoking the current session.
    pub fn invalidate_session(&self) {
        tracing::info!("identity provider invalidated the session");
        self.announce(AuthState::SignedOut);
    }

    fn announce(&self, state: AuthState) {
        // send_replace never fails, even with no live receivers.
        self.state.send_replace(state);
    }
}

impl Default for InMemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SessionIdentity, SessionError> {
        let identity = {
            let accounts = self
                .accounts
                .lock()
                .map_err(|_| SessionError::ProviderUnavailable("lock poisoned".to_string()))?;
            match accounts.get(email) {
                Some((expected, identity)) if expected == password => identity.clone(),
                _ => return Err(SessionError::InvalidCredentials),
            }
        };

        self.announce(AuthState::SignedIn(identity.clone()));
        Ok(identity)
    }

    async fn sign_in_with_popup(
        &self,
        provider: PopupProvider,
    ) -> Result<SessionIdentity, SessionError> {
        let identity = {
            let popup = self
                .popup_accounts
                .lock()
                .map_err(|_| SessionError::ProviderUnavailable("lock poisoned".to_string()))?;
            popup.get(&provider).cloned().ok_or(SessionError::PopupClosed)?
        };

        self.announce(AuthState::SignedIn(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), SessionError> {
        self.announce(AuthState::SignedOut);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }
}
