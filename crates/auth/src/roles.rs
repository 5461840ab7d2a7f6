use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role identifier used for RBAC.
///
/// Two roles are known: `viewer` and `admin`. `admin` grants everything `viewer`
/// does. Unknown role names are carried through but grant nothing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const ADMIN: &'static str = "admin";
    pub const VIEWER: &'static str = "viewer";

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn admin() -> Self {
        Self(Cow::Borrowed(Self::ADMIN))
    }

    pub fn viewer() -> Self {
        Self(Cow::Borrowed(Self::VIEWER))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether holding `self` satisfies a requirement for `required`.
    pub fn grants(&self, required: &Role) -> bool {
        match (self.as_str(), required.as_str()) {
            (Self::ADMIN, Self::ADMIN | Self::VIEWER) => true,
            (Self::VIEWER, Self::VIEWER) => true,
            _ => false,
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
