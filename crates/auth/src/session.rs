//! Session / role store.
//!
//! `SessionStore` mirrors whatever the identity provider last announced. It
//! has two observable states, signed in and signed out, plus a loading flag
//! that is only true until the provider's first report after startup.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::watch;

use crate::principal::SessionIdentity;
use crate::provider::{AuthState, IdentityProvider, PopupProvider};
use crate::resolve::{RoleResolution, RoleResolver};
use crate::roles::Role;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("sign-in popup was closed before completing")]
    PopupClosed,
    #[error("identity provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("identity provider stopped publishing session changes")]
    ProviderClosed,
}

pub struct SessionStore {
    provider: Arc<dyn IdentityProvider>,
    resolver: RoleResolver,
    state: watch::Receiver<AuthState>,
    last_error: Mutex<Option<String>>,
}

impl SessionStore {
    /// Subscribe to `provider` (exactly once) and start mirroring its state.
    pub fn new(provider: Arc<dyn IdentityProvider>, resolver: RoleResolver) -> Self {
        let state = provider.subscribe();
        Self {
            provider,
            resolver,
            state,
            last_error: Mutex::new(None),
        }
    }

    pub fn current_user(&self) -> Option<SessionIdentity> {
        self.state.borrow().identity().cloned()
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.borrow().identity().is_some()
    }

    pub fn is_loading(&self) -> bool {
        matches!(*self.state.borrow(), AuthState::Resolving)
    }

    /// Message of the last failed sign-in/sign-out, cleared on the next attempt.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }

    /// A receiver of raw provider announcements (for UI bindings).
    pub fn changes(&self) -> watch::Receiver<AuthState> {
        self.state.clone()
    }

    /// Wait for the provider's first report, then return the current user.
    pub async fn wait_until_resolved(&self) -> Result<Option<SessionIdentity>, SessionError> {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|s| !matches!(s, AuthState::Resolving))
            .await
            .map_err(|_| SessionError::ProviderClosed)?;
        Ok(state.identity().cloned())
    }

    pub async fn login_with_email(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SessionIdentity, SessionError> {
        self.clear_error();
        let result = self.provider.sign_in_with_password(email, password).await;
        self.record(result)
    }

    pub async fn login_with_popup(
        &self,
        provider: PopupProvider,
    ) -> Result<SessionIdentity, SessionError> {
        self.clear_error();
        let result = self.provider.sign_in_with_popup(provider).await;
        self.record(result)
    }

    pub async fn logout(&self) -> Result<(), SessionError> {
        let result = self.provider.sign_out().await;
        self.record(result)
    }

    /// Resolve the role of the current user once the session is known.
    pub async fn user_role(&self) -> Result<Option<Role>, SessionError> {
        Ok(self.user_role_resolution().await?.map(|r| r.role))
    }

    pub async fn user_role_resolution(&self) -> Result<Option<RoleResolution>, SessionError> {
        let user = self.wait_until_resolved().await?;
        Ok(self.resolver.resolve(user.as_ref()).await)
    }

    fn clear_error(&self) {
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = None;
        }
    }

    fn record<T>(&self, result: Result<T, SessionError>) -> Result<T, SessionError> {
        if let Err(err) = &result {
            tracing::warn!(error = %err, "session operation failed");
            if let Ok(mut slot) = self.last_error.lock() {
                *slot = Some(err.to_string());
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::AdminPolicy;
    use crate::provider::InMemoryIdentityProvider;
    use crate::role_store::InMemoryRoleStore;
    use engage360_core::UserId;

    fn member() -> SessionIdentity {
        SessionIdentity::new(UserId::new("u1"), "member@example.org").with_display_name("Member")
    }

    fn admin() -> SessionIdentity {
        SessionIdentity::new(UserId::new("a1"), "admin@engage360.com")
    }

    fn store_with(provider: Arc<InMemoryIdentityProvider>) -> SessionStore {
        let resolver = RoleResolver::new(
            Arc::new(AdminPolicy::default()),
            Arc::new(InMemoryRoleStore::new()),
        );
        SessionStore::new(provider, resolver)
    }

    #[tokio::test]
    async fn loading_until_provider_reports() {
        let provider = Arc::new(InMemoryIdentityProvider::new());
        let session = store_with(provider.clone());

        assert!(session.is_loading());
        assert!(!session.is_logged_in());

        provider.restore(None);

        assert!(!session.is_loading());
        assert_eq!(session.wait_until_resolved().await.unwrap(), None);
    }

    #[tokio::test]
    async fn password_sign_in_and_sign_out_follow_provider() {
        let provider = Arc::new(InMemoryIdentityProvider::new().with_account(member(), "s3cret"));
        provider.restore(None);
        let session = store_with(provider.clone());

        let user = session.login_with_email("member@example.org", "s3cret").await.unwrap();
        assert_eq!(user, member());
        assert_eq!(session.current_user(), Some(member()));
        assert_eq!(session.user_role().await.unwrap(), Some(Role::User));

        session.logout().await.unwrap();
        assert_eq!(session.current_user(), None);
        assert_eq!(session.user_role().await.unwrap(), None);
    }

    #[tokio::test]
    async fn failed_sign_in_is_recorded_and_state_unchanged() {
        let provider = Arc::new(InMemoryIdentityProvider::new().with_account(member(), "s3cret"));
        provider.restore(None);
        let session = store_with(provider);

        let err = session.login_with_email("member@example.org", "wrong").await.unwrap_err();
        assert_eq!(err, SessionError::InvalidCredentials);
        assert_eq!(session.last_error(), Some("invalid email or password".to_string()));
        assert!(!session.is_logged_in());
    }

    #[tokio::test]
    async fn popup_sign_in_resolves_allow_listed_admin() {
        let provider = Arc::new(
            InMemoryIdentityProvider::new().with_popup_account(PopupProvider::Google, admin()),
        );
        provider.restore(None);
        let session = store_with(provider);

        session.login_with_popup(PopupProvider::Google).await.unwrap();
        assert_eq!(session.user_role().await.unwrap(), Some(Role::Admin));
    }

    #[tokio::test]
    async fn provider_invalidation_signs_the_session_out() {
        let provider = Arc::new(InMemoryIdentityProvider::new());
        provider.restore(Some(member()));
        let session = store_with(provider.clone());
        assert!(session.is_logged_in());

        provider.invalidate_session();
        assert!(!session.is_logged_in());
    }
}
