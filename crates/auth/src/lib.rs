//! `engage360-auth`: session identity, role resolution and navigation gating.
//!
//! The identity provider and the role-assignment store are traits; this crate
//! ships in-memory implementations for tests and local development only.

pub mod guard;
pub mod policy;
pub mod principal;
pub mod provider;
pub mod resolve;
pub mod role_store;
pub mod roles;
pub mod session;

pub use guard::{AccessContext, LOGIN_PATH, NavigationDecision, Route, RouteMeta, RouterGuard, default_routes};
pub use policy::{AdminPolicy, DEFAULT_ADMIN_EMAILS};
pub use principal::SessionIdentity;
pub use provider::{AuthState, IdentityProvider, InMemoryIdentityProvider, PopupProvider};
pub use resolve::{RoleResolution, RoleResolver, RoleSource};
pub use role_store::{InMemoryRoleStore, RoleAssignmentStore, RoleStoreError};
pub use roles::Role;
pub use session::{SessionError, SessionStore};
