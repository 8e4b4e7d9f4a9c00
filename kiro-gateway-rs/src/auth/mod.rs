//! Token refresh endpoints and per-credential identity helpers.
//!
//! This crate only speaks the two upstream refresh flavors; the Credential
//! Pool, Token Store, and Refresh Coordinator that decide *when* to call
//! these functions (and what to do with the result) live in the proxy crate.

pub mod aws_sso_oidc;
pub mod constants;
pub mod kiro_desktop;
