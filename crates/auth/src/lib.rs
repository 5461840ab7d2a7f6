//! `docflow-auth`: pure authentication/authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage: it turns a bearer
//! token into validated claims and answers role questions about them.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod roles;

pub use authorize::{require_role, AuthzError};
pub use claims::{validate_claims, JwtClaims, TokenValidationError};
pub use jwt::{Hs256JwtValidator, JwtError, JwtValidator};
pub use roles::Role;
