/// Identity and session handling
///
/// - `IdentityProvider`: the external identity collaborator
/// - `AuthSessionManager`: holds the current session and drives sign-in/up/out
/// - `GoTrueClient`: HTTP adapter for a GoTrue-compatible auth server
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod gotrue;
pub mod session;

pub use gotrue::GoTrueClient;
pub use session::{AuthSessionManager, SessionContext, Subscription};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Session changes pushed by the identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Session),
    TokenRefreshed(Session),
    SignedOut,
}

impl AuthEvent {
    /// Session state after the event
    pub fn into_session(self) -> Option<Session> {
        match self {
            AuthEvent::SignedIn(session) | AuthEvent::TokenRefreshed(session) => Some(session),
            AuthEvent::SignedOut => None,
        }
    }
}

/// Extra data stored with a new identity; the profile row is derived from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignUpMetadata {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    /// Identity created and signed in
    SignedIn(Session),
    /// Identity created; email must be confirmed before signing in
    ConfirmationPending { user_id: Uuid },
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Provider refused the request (email taken, weak password, ...)
    #[error("{0}")]
    Rejected(String),

    #[error("no active session")]
    NoSession,

    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Identity collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Session the provider currently holds, if any
    async fn get_session(&self) -> Result<Option<Session>, IdentityError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, IdentityError>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: SignUpMetadata,
    ) -> Result<SignUpOutcome, IdentityError>;

    async fn sign_out(&self) -> Result<(), IdentityError>;

    /// Stream of session changes (`onAuthStateChange`)
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}
