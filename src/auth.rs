//! Session handling.
//!
//! A run either shares one Vestro session across all subjects or opens a
//! session per subject with that subject's own credentials. Both paths go
//! through [`SessionProvider`], so the orchestration loop never cares which
//! one is configured.

use crate::config::{AuthMode, RemoteConfig};
use crate::error::AuthError;
use crate::models::{SessionToken, Subject};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Exchanges a login and password for a bearer token.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(
        &self,
        login: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> Result<SessionToken, AuthError>;
}

/// Which credentials open a session.
#[derive(Clone)]
pub enum AuthStrategy {
    /// One session per run.
    Shared { login: String, password: String },
    /// One session per subject.
    PerSubject,
}

impl std::fmt::Debug for AuthStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthStrategy::Shared { login, .. } => f
                .debug_struct("Shared")
                .field("login", login)
                .finish_non_exhaustive(),
            AuthStrategy::PerSubject => f.write_str("PerSubject"),
        }
    }
}

impl AuthStrategy {
    /// Build the strategy from validated configuration.
    pub fn from_config(config: &RemoteConfig) -> Self {
        match config.auth_mode {
            AuthMode::Shared => AuthStrategy::Shared {
                login: config.login.clone().unwrap_or_default(),
                password: config.password.clone().unwrap_or_default(),
            },
            AuthMode::PerSubject => AuthStrategy::PerSubject,
        }
    }

    pub fn mode(&self) -> AuthMode {
        match self {
            AuthStrategy::Shared { .. } => AuthMode::Shared,
            AuthStrategy::PerSubject => AuthMode::PerSubject,
        }
    }
}

/// Hands out session tokens according to the configured strategy.
pub struct SessionProvider<A> {
    authenticator: A,
    strategy: AuthStrategy,
    shared: Option<SessionToken>,
}

impl<A: Authenticator> SessionProvider<A> {
    pub fn new(authenticator: A, strategy: AuthStrategy) -> Self {
        Self {
            authenticator,
            strategy,
            shared: None,
        }
    }

    pub fn mode(&self) -> AuthMode {
        self.strategy.mode()
    }

    /// Whether subjects must carry an identity to filter records by.
    ///
    /// A shared session sees every producer's data, so the identity filter
    /// is the only thing scoping the fetch to one subject.
    pub fn requires_identity(&self) -> bool {
        matches!(self.strategy, AuthStrategy::Shared { .. })
    }

    /// Open the run-level session, if the strategy has one.
    ///
    /// Idempotent: a second call reuses the cached token.
    pub async fn start_run(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<SessionToken>, AuthError> {
        let AuthStrategy::Shared {
            ref login,
            ref password,
        } = self.strategy
        else {
            return Ok(None);
        };

        if let Some(ref token) = self.shared {
            return Ok(Some(token.clone()));
        }

        info!("Authenticating with Vestro API (shared session)...");
        let token = self
            .authenticator
            .authenticate(login, password, cancel)
            .await?;
        info!("Authentication successful.");
        self.shared = Some(token.clone());
        Ok(Some(token))
    }

    /// The session a subject's fetches should use.
    pub async fn session_for(
        &mut self,
        subject: &Subject,
        cancel: &CancellationToken,
    ) -> Result<SessionToken, AuthError> {
        match self.strategy {
            AuthStrategy::Shared { .. } => match self.start_run(cancel).await? {
                Some(token) => Ok(token),
                None => Err(AuthError::Rejected),
            },
            AuthStrategy::PerSubject => {
                let (login, password) = subject
                    .credentials()
                    .ok_or(AuthError::MissingCredentials { subject: subject.id })?;
                debug!(subject = subject.id, "Authenticating subject");
                self.authenticator
                    .authenticate(login, password, cancel)
                    .await
            }
        }
    }
}
