//! Navigation guard for auth- and role-restricted views.
//!
//! Denied navigations always go to the login view; there is no separate
//! "forbidden" page. Role resolution itself fails open (see `RoleResolver`),
//! but any error while establishing the session fails closed here.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::principal::SessionIdentity;
use crate::roles::Role;
use crate::session::{SessionError, SessionStore};

pub const LOGIN_PATH: &str = "/login";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteMeta {
    #[serde(default)]
    pub requires_auth: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_role: Option<Role>,
}

impl RouteMeta {
    pub fn public() -> Self {
        Self::default()
    }

    pub fn authenticated() -> Self {
        Self {
            requires_auth: true,
            requires_role: None,
        }
    }

    pub fn role(role: Role) -> Self {
        Self {
            requires_auth: false,
            requires_role: Some(role),
        }
    }

    fn is_restricted(&self) -> bool {
        self.requires_auth || self.requires_role.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: String,
    pub path: String,
    pub meta: RouteMeta,
}

impl Route {
    pub fn new(name: impl Into<String>, path: impl Into<String>, meta: RouteMeta) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            meta,
        }
    }
}

/// The application's route table.
pub fn default_routes() -> Vec<Route> {
    vec![
        Route::new("Home", "/", RouteMeta::public()),
        Route::new("Form", "/form", RouteMeta::public()),
        Route::new("FAQ", "/faq", RouteMeta::public()),
        Route::new("About", "/about", RouteMeta::public()),
        Route::new("Login", LOGIN_PATH, RouteMeta::public()),
        Route::new("Register", "/register", RouteMeta::public()),
        Route::new("Admin", "/admin", RouteMeta::role(Role::Admin)),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationDecision {
    Proceed,
    Redirect(String),
}

impl NavigationDecision {
    fn to_login() -> Self {
        NavigationDecision::Redirect(LOGIN_PATH.to_string())
    }
}

/// What the guard needs to know about the current session.
#[async_trait]
pub trait AccessContext: Send + Sync {
    /// The signed-in identity, after the session has been established.
    async fn authenticated_user(&self) -> Result<Option<SessionIdentity>, SessionError>;

    /// The resolved role, after the session has been established.
    async fn role(&self) -> Result<Option<Role>, SessionError>;
}

#[async_trait]
impl AccessContext for SessionStore {
    async fn authenticated_user(&self) -> Result<Option<SessionIdentity>, SessionError> {
        self.wait_until_resolved().await
    }

    async fn role(&self) -> Result<Option<Role>, SessionError> {
        self.user_role().await
    }
}

pub struct RouterGuard<C: AccessContext + ?Sized> {
    context: Arc<C>,
    routes: Vec<Route>,
}

impl<C: AccessContext + ?Sized> RouterGuard<C> {
    pub fn new(context: Arc<C>) -> Self {
        Self::with_routes(context, default_routes())
    }

    pub fn with_routes(context: Arc<C>, routes: Vec<Route>) -> Self {
        Self { context, routes }
    }

    pub fn route(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.path == path)
    }

    /// Decide a navigation to `path`. Unknown paths carry no restrictions.
    pub async fn navigate(&self, path: &str) -> NavigationDecision {
        match self.route(path) {
            Some(route) => self.before_each(route).await,
            None => NavigationDecision::Proceed,
        }
    }

    /// Decide whether navigation into `to` may proceed.
    ///
    /// Unrestricted routes proceed without waiting for the session. For
    /// restricted ones the decision waits for the session (and the role, if
    /// one is required) to resolve.
    pub async fn before_each(&self, to: &Route) -> NavigationDecision {
        if !to.meta.is_restricted() {
            return NavigationDecision::Proceed;
        }

        if to.meta.requires_auth {
            match self.context.authenticated_user().await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    tracing::debug!(route = %to.name, "navigation requires sign-in");
                    return NavigationDecision::to_login();
                }
                Err(err) => {
                    tracing::warn!(route = %to.name, error = %err, "session resolution failed");
                    return NavigationDecision::to_login();
                }
            }
        }

        if let Some(required) = to.meta.requires_role {
            match self.context.role().await {
                Ok(Some(role)) if role == required => {}
                Ok(role) => {
                    tracing::debug!(
                        route = %to.name,
                        required = %required,
                        actual = ?role,
                        "navigation denied: role mismatch"
                    );
                    return NavigationDecision::to_login();
                }
                Err(err) => {
                    tracing::warn!(route = %to.name, error = %err, "role resolution failed");
                    return NavigationDecision::to_login();
                }
            }
        }

        NavigationDecision::Proceed
    }
}
