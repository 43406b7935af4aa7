//! Token lifecycle: issuance, verification, revocation, and the account
//! flows built on them.

pub mod password;
pub mod revocation;
pub mod service;
pub mod tokens;
