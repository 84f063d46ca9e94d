//! Role resolution for the signed-in identity.

use std::sync::Arc;

use serde::Serialize;

use crate::policy::AdminPolicy;
use crate::principal::SessionIdentity;
use crate::role_store::RoleAssignmentStore;
use crate::roles::Role;

/// Where a resolved role came from (for logs and admin tooling).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleSource {
    /// The email is on the allow-list; the store was not consulted.
    AllowList,
    /// The role-assignment store has an explicit record.
    Store,
    /// No record, or the store could not be read.
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoleResolution {
    pub role: Role,
    pub source: RoleSource,
}

/// Resolves the role of an identity.
///
/// Precedence, highest first:
/// 1. no identity: no role
/// 2. allow-listed email: `admin`, without touching the store
/// 3. explicit store record: `admin` or `user` per its flag
/// 4. store miss or store error: `user`
///
/// The allow-list is checked before any IO, so an allow-listed address stays
/// `admin` when the store is unreachable. Resolution never fails; store
/// errors degrade to step 4.
#[derive(Clone)]
pub struct RoleResolver {
    policy: Arc<AdminPolicy>,
    store: Arc<dyn RoleAssignmentStore>,
}

impl RoleResolver {
    pub fn new(policy: Arc<AdminPolicy>, store: Arc<dyn RoleAssignmentStore>) -> Self {
        Self { policy, store }
    }

    pub async fn resolve(&self, identity: Option<&SessionIdentity>) -> Option<RoleResolution> {
        let identity = identity?;
        let email = identity.email.as_str();

        if self.policy.is_allow_listed(email) {
            tracing::debug!(email, "admin role granted by allow-list");
            return Some(RoleResolution {
                role: Role::Admin,
                source: RoleSource::AllowList,
            });
        }

        match self.store.admin_flag(email).await {
            Ok(Some(is_admin)) => {
                tracing::debug!(email, is_admin, "role resolved from role-assignment store");
                Some(RoleResolution {
                    role: Role::from_admin_flag(is_admin),
                    source: RoleSource::Store,
                })
            }
            Ok(None) => Some(Self::default_role()),
            Err(err) => {
                tracing::warn!(email, error = %err, "role lookup failed; defaulting to user");
                Some(Self::default_role())
            }
        }
    }

    pub async fn role_of(&self, identity: Option<&SessionIdentity>) -> Option<Role> {
        self.resolve(identity).await.map(|r| r.role)
    }

    fn default_role() -> RoleResolution {
        RoleResolution {
            role: Role::User,
            source: RoleSource::Default,
        }
    }
}
