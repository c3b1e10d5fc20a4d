//! Authentication controller.
//!
//! [`AuthController`] decides whether a cached token can be reused, when the
//! user must be asked for a password, and when a rejected call is retried.
//!
//! # States
//!
//! ```text
//! NoCredential ──login──▶ AwaitingPassword ──success──▶ Authenticated
//!                                ▲                            │
//!                                └──── 401 from a call ───────┘
//! ```
//!
//! - Password entry is bounded by [`MAX_PASSWORD_ATTEMPTS`].
//! - A resolution rejected with a recoverable authentication error is retried
//!   exactly once, after exactly one re-authentication.
//! - Every successful login exchanges the session token for a read-only
//!   scoped token and caches it for later invocations.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::client::{ApiError, DirectoryApi};
use crate::model::{Device, DeviceQuery, TokenTtl};
use crate::prompt::{Prompt, PromptError};
use crate::store::{CredentialStore, StoreError};

/// Failed password entries tolerated before giving up.
pub const MAX_PASSWORD_ATTEMPTS: u32 = 3;

/// Error type for the authentication flow.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The password was rejected too many times.
    #[error("max password attempts exceeded ({attempts})")]
    MaxAttemptsExceeded { attempts: u32 },

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// Where the controller is in the authentication flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No usable token is held.
    NoCredential,

    /// A password is being requested.
    AwaitingPassword,

    /// A token is held that is believed to be valid.
    Authenticated,
}

/// Drives token reuse, interactive login, and the single retry on rejection.
pub struct AuthController<C, S, P> {
    client: C,
    store: S,
    prompt: P,
    state: AuthState,
    token_ttl: TokenTtl,
    max_attempts: u32,
}

impl<C, S, P> AuthController<C, S, P>
where
    C: DirectoryApi,
    S: CredentialStore,
    P: Prompt,
{
    /// Create a controller, picking up a cached token for the client's user.
    ///
    /// A client that is already authenticated keeps its session and the cache
    /// is not consulted. A cached token for a different user is ignored.
    pub fn new(mut client: C, store: S, prompt: P) -> Result<Self, AuthError> {
        if client.is_authenticated() {
            debug!("Reusing authenticated session for {}", client.user_name());
            return Ok(Self::with_state(client, store, prompt, AuthState::Authenticated));
        }

        let state = match store.read_token(client.user_name())? {
            Some(token) => {
                debug!("Using cached token for {}", client.user_name());
                client.set_token(token);
                AuthState::Authenticated
            }
            None => {
                debug!("No cached token for {}", client.user_name());
                AuthState::NoCredential
            }
        };

        Ok(Self::with_state(client, store, prompt, state))
    }

    fn with_state(client: C, store: S, prompt: P, state: AuthState) -> Self {
        Self {
            client,
            store,
            prompt,
            state,
            token_ttl: TokenTtl::default(),
            max_attempts: MAX_PASSWORD_ATTEMPTS,
        }
    }

    /// Set the lifetime requested for cached scoped tokens.
    pub fn with_token_ttl(mut self, token_ttl: TokenTtl) -> Self {
        self.token_ttl = token_ttl;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Resolve `query`, authenticating first if needed.
    ///
    /// If the directory rejects the token, the user is asked to log in again
    /// and the query is retried once. A second rejection is returned as is.
    pub fn resolve(&mut self, query: &DeviceQuery) -> Result<Vec<Device>, AuthError> {
        self.ensure_authenticated()?;

        match self.client.resolve_devices(query) {
            Err(e) if e.is_recoverable() => {
                info!(
                    "Token for {} was rejected ({}), re-authenticating",
                    self.client.user_name(),
                    e
                );
                self.state = AuthState::AwaitingPassword;
                self.login()?;

                let retried = self.client.resolve_devices(query);
                if matches!(&retried, Err(e) if e.is_recoverable()) {
                    self.state = AuthState::AwaitingPassword;
                }
                Ok(retried?)
            }
            result => Ok(result?),
        }
    }

    /// Log in unless a token is already held.
    pub fn ensure_authenticated(&mut self) -> Result<(), AuthError> {
        if self.state == AuthState::Authenticated {
            return Ok(());
        }
        self.login()
    }

    /// Ask for a password until it is accepted or the attempt limit is hit,
    /// then cache a scoped token.
    pub fn login(&mut self) -> Result<(), AuthError> {
        self.state = AuthState::AwaitingPassword;
        let user = self.client.user_name().to_string();
        self.prompt
            .notify(&format!("Authentication is required for {}", user));

        let mut attempts = 0;
        loop {
            let password = self.prompt.read_password("Enter Password: ")?;
            match self.client.authenticate(&password) {
                Ok(()) => break,
                Err(e) if e.is_rejected_password() => {
                    attempts += 1;
                    warn!(
                        "Password attempt {}/{} for {} failed: {}",
                        attempts, self.max_attempts, user, e
                    );
                    if attempts >= self.max_attempts {
                        return Err(AuthError::MaxAttemptsExceeded { attempts });
                    }
                    self.prompt.notify("Incorrect user/password, try again");
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.state = AuthState::Authenticated;
        self.cache_scoped_token(&user)
    }

    fn cache_scoped_token(&mut self, user: &str) -> Result<(), AuthError> {
        let scoped = self.client.request_scoped_token(self.token_ttl)?;

        match self.store.write_token(user, &scoped) {
            Ok(()) => info!("Cached {} token for {}", self.token_ttl, user),
            // The session token still works for this run; the next one re-authenticates.
            Err(e) => warn!("Failed to cache token for {}: {}", user, e),
        }
        Ok(())
    }
}
