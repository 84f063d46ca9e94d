use serde::{Deserialize, Serialize};

use engage360_core::UserId;

/// The authenticated principal as reported by the identity provider.
///
/// Application code never constructs or mutates the current session identity
/// directly; it only reads what the provider last announced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentity {
    pub uid: UserId,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
}

impl SessionIdentity {
    pub fn new(uid: UserId, email: impl Into<String>) -> Self {
        Self {
            uid,
            email: email.into(),
            display_name: None,
            email_verified: false,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}
