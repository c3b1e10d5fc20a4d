//! # fleetdir core
//!
//! Core library for resolving fleet device names through the directory service.
//!
//! This crate provides:
//! - Domain types for identities, device queries, and resolved devices
//! - Cross-process advisory file locks guarding the persisted records
//! - A credential store trait with file-backed and in-memory implementations
//! - A blocking HTTP client for the directory service
//! - The authentication controller that reuses, refreshes, and persists tokens
//! - Target list construction for the fleet tool
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fleetdir_core::{AuthController, CredentialStore, DirectoryClient, FileStore, HttpSettings, TerminalPrompt};
//!
//! let store = FileStore::in_home()?;
//! let identity = store.read_identity()?;
//! let client = DirectoryClient::new(&identity, &HttpSettings::default())?;
//! let mut controller = AuthController::new(client, store, TerminalPrompt)?;
//! let devices = controller.resolve(&"group1 group2:gp".parse()?)?;
//! ```

pub mod auth;
pub mod client;
pub mod lock;
pub mod model;
pub mod prompt;
pub mod store;
pub mod target;

// Re-export commonly used types at crate root
pub use model::{
    Device,
    DeviceQuery,
    DeviceSelector,
    Identity,
    InvalidIdentity,
    QueryParseError,
    TokenRecord,
    TokenTtl,
};

pub use lock::{
    FileLock,
    LockError,
    LockGuard,
    LockSettings,
};

pub use store::{
    CredentialStore,
    FileStore,
    MemoryStore,
    Secret,
    StoreError,
};

pub use client::{
    ApiError,
    DirectoryApi,
    DirectoryClient,
    HttpSettings,
};

pub use auth::{
    AuthController,
    AuthError,
    AuthState,
    MAX_PASSWORD_ATTEMPTS,
};

pub use prompt::{
    Prompt,
    PromptError,
    TerminalPrompt,
};

pub use target::{
    TargetCommand,
    TargetError,
    DEFAULT_TEST_HOST,
    target_prefix,
};
