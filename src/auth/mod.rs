//! Polymorphic authentication and quota resolution against the external
//! identity provider (spec §4.5, §6, §9 "Polymorphic authentication").

pub mod provider;
pub mod quota_resolver;

pub use provider::{Authenticator, GroupRole, MockAuthenticator, RealAuthenticator, SharedAuthenticator};
