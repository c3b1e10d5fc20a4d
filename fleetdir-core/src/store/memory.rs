//! In-memory credential storage implementation.

use parking_lot::RwLock;
use std::path::PathBuf;

use super::{CredentialStore, Secret, StoreError};
use crate::model::{Identity, TokenRecord};

/// In-memory credential store for testing and development.
///
/// This store is not persistent; data is lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    identity: RwLock<Option<Identity>>,
    token: RwLock<Option<TokenRecord>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(self, identity: Identity) -> Self {
        *self.identity.write() = Some(identity);
        self
    }

    pub fn with_token(self, user_name: impl Into<String>, token: Secret) -> Self {
        *self.token.write() = Some(TokenRecord::new(user_name, token));
        self
    }

    /// The raw token record, regardless of which user it belongs to.
    pub fn token_record(&self) -> Option<TokenRecord> {
        self.token.read().clone()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("identity", &*self.identity.read())
            .field("has_token", &self.token.read().is_some())
            .finish()
    }
}

impl CredentialStore for MemoryStore {
    fn read_identity(&self) -> Result<Identity, StoreError> {
        let identity = self
            .identity
            .read()
            .clone()
            .ok_or_else(|| StoreError::ConfigMissing {
                path: PathBuf::from("<memory>"),
            })?;
        identity.validate()?;
        Ok(identity)
    }

    fn write_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        identity.validate()?;
        *self.identity.write() = Some(identity.clone());
        Ok(())
    }

    fn read_token(&self, user_name: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self
            .token
            .read()
            .as_ref()
            .and_then(|record| record.token_for(user_name).cloned()))
    }

    fn write_token(&self, user_name: &str, token: &Secret) -> Result<(), StoreError> {
        *self.token.write() = Some(TokenRecord::new(user_name, token.clone()));
        Ok(())
    }
}
