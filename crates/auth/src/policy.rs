//! Administrator allow-list.
//!
//! This is the one place the allow-list lives. Role resolution consults it
//! before the role-assignment store, so an allow-listed address is an
//! administrator even while the store is unreachable.

use std::collections::BTreeSet;

/// Addresses granted the admin role unconditionally.
pub const DEFAULT_ADMIN_EMAILS: [&str; 3] = [
    "admin@engage360.com",
    "test@admin.com",
    "shreyasnatraj97@gmail.com",
];

/// Environment variable holding a comma-separated allow-list override.
pub const ADMIN_EMAILS_ENV: &str = "ENGAGE360_ADMIN_EMAILS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminPolicy {
    emails: BTreeSet<String>,
}

impl AdminPolicy {
    pub fn new<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            emails: emails.into_iter().map(Into::into).collect(),
        }
    }

    /// Build the policy from `ENGAGE360_ADMIN_EMAILS`, falling back to the
    /// built-in list when the variable is unset or lists no addresses.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let configured: BTreeSet<String> = lookup(ADMIN_EMAILS_ENV)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        if configured.is_empty() {
            Self::default()
        } else {
            Self { emails: configured }
        }
    }

    /// Exact, case-sensitive membership check.
    pub fn is_allow_listed(&self, email: &str) -> bool {
        self.emails.contains(email)
    }
}

impl Default for AdminPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ADMIN_EMAILS)
    }
}
