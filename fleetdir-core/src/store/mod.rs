//! Credential storage abstraction.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for tokens and passwords that prevents accidental logging
//! - [`CredentialStore`] - Trait for identity and token persistence
//! - [`FileStore`] - Lock-guarded YAML files in the user's home directory
//! - [`MemoryStore`] - In-memory implementation for testing
//!
//! # Records
//!
//! Two independent records are kept, each with its own sibling lock file:
//! - the identity (`server-url`, `user-name`)
//! - the token cache (`user-name`, `token`)
//!
//! A cached token is only ever handed out for the user it was issued to.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::lock::LockError;
use crate::model::{Identity, InvalidIdentity};

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the backing memory is zeroed on drop.
#[derive(Clone, Default, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for credential store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The identity file does not exist yet.
    #[error("user config is missing: {path}")]
    ConfigMissing { path: PathBuf },

    /// The identity file exists but is incomplete.
    #[error("invalid user config: {0}")]
    InvalidIdentity(#[from] InvalidIdentity),

    /// A lock could not be acquired in time.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// I/O error reading or writing a record.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The home directory could not be determined.
    #[error("home directory not available")]
    HomeDirUnavailable,
}

/// Persistence for the identity and token records.
///
/// Implementations include:
/// - [`FileStore`] - YAML files guarded by advisory locks
/// - [`MemoryStore`] - In-memory storage for testing
pub trait CredentialStore {
    /// Load the identity.
    ///
    /// Fails with [`StoreError::ConfigMissing`] when none has been saved.
    fn read_identity(&self) -> Result<Identity, StoreError>;

    /// Persist the identity, replacing any previous one.
    fn write_identity(&self, identity: &Identity) -> Result<(), StoreError>;

    /// Load the cached token for `user_name`.
    ///
    /// Returns `Ok(None)` if nothing is cached or the cached token belongs to
    /// a different user.
    fn read_token(&self, user_name: &str) -> Result<Option<Secret>, StoreError>;

    /// Persist `token` as the cached token for `user_name`.
    fn write_token(&self, user_name: &str, token: &Secret) -> Result<(), StoreError>;
}
