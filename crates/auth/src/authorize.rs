use thiserror::Error;

use crate::Role;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: role '{held}' does not grant '{required}'")]
    Forbidden { held: String, required: String },
}

/// Check that `held` satisfies `required`.
///
/// - No IO
/// - No panics
pub fn require_role(held: &Role, required: &Role) -> Result<(), AuthzError> {
    if held.grants(required) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden {
            held: held.as_str().to_string(),
            required: required.as_str().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewer_cannot_act_as_admin() {
        let err = require_role(&Role::viewer(), &Role::admin()).unwrap_err();
        assert_eq!(
            err,
            AuthzError::Forbidden {
                held: "viewer".into(),
                required: "admin".into()
            }
        );
    }

    #[test]
    fn admin_passes_viewer_gate() {
        assert!(require_role(&Role::admin(), &Role::viewer()).is_ok());
    }
}
