//! Core contracts for objfs: secret stores, credentials and auth providers,
//! and the object storage interface backends implement.

pub mod auth;
pub mod keyring;
pub mod objio;
pub mod registry;
