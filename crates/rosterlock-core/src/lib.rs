//! Core library for Rosterlock, an encrypted membership administration tool.
//!
//! Every personally identifying field is encrypted under a long-lived RSA key
//! pair before it reaches disk ([`cipher::FieldCipher`]), every privileged
//! action is recorded in an append-only encrypted audit log ([`audit::AuditLog`]),
//! and [`backup::BackupCoordinator`] snapshots the data store together with the
//! audit artifacts into portable zip archives.

pub mod audit;
pub mod backup;
pub mod cipher;
pub mod error;
pub mod keystore;
pub mod paths;
pub mod store;

pub use error::{Error, Result};
