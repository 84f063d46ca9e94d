use serde::{Deserialize, Serialize};

/// Authorization role of a signed-in user.
///
/// There are only two roles; anything that is not an administrator is a
/// regular user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    pub fn from_admin_flag(is_admin: bool) -> Self {
        if is_admin { Role::Admin } else { Role::User }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
