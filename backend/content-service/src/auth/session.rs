/// Current-identity state
///
/// The signed-in session is the only process-wide mutable state in the core.
/// It sits in a `watch` channel: sign-in/up/out and provider events write to
/// it, everything else observes it through `SessionContext` or `on_change`.
use super::{AuthEvent, IdentityError, IdentityProvider, Session, SignUpMetadata, SignUpOutcome};
use crate::db::ContentRepository;
use crate::error::{ContentError, Result};
use crate::validators::{validate_email, validate_password, validate_username, MIN_PASSWORD_LEN};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Read-only view of the current session
///
/// Cheap to clone; handed to operations that act on behalf of the user.
#[derive(Debug, Clone)]
pub struct SessionContext {
    rx: watch::Receiver<Option<Session>>,
}

impl SessionContext {
    /// Context pinned to a fixed session, not tied to any manager
    pub fn detached(session: Option<Session>) -> Self {
        let (_tx, rx) = watch::channel(session);
        Self { rx }
    }

    pub fn current_session(&self) -> Option<Session> {
        self.rx.borrow().clone()
    }

    pub fn current_user_id(&self) -> Option<Uuid> {
        self.rx.borrow().as_ref().map(|s| s.user_id)
    }

    pub fn require_user_id(&self) -> Result<Uuid> {
        self.current_user_id()
            .ok_or_else(|| ContentError::Auth("not signed in".to_string()))
    }

    /// Wait for the next change and return the new session.
    ///
    /// Fails with `Auth` once the owning manager is gone.
    pub async fn changed(&mut self) -> Result<Option<Session>> {
        self.rx
            .changed()
            .await
            .map_err(|_| ContentError::Auth("session source closed".to_string()))?;
        Ok(self.rx.borrow_and_update().clone())
    }
}

/// Handle returned by `AuthSessionManager::on_change`
///
/// The callback stops running when this is dropped or unsubscribed.
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct AuthSessionManager {
    provider: Arc<dyn IdentityProvider>,
    repo: ContentRepository,
    state: Arc<watch::Sender<Option<Session>>>,
}

impl AuthSessionManager {
    pub fn new(provider: Arc<dyn IdentityProvider>, repo: ContentRepository) -> Self {
        let (state, _rx) = watch::channel(None);
        Self {
            provider,
            repo,
            state: Arc::new(state),
        }
    }

    pub fn current_session(&self) -> Option<Session> {
        self.state.borrow().clone()
    }

    pub fn current_user_id(&self) -> Option<Uuid> {
        self.state.borrow().as_ref().map(|s| s.user_id)
    }

    pub fn context(&self) -> SessionContext {
        SessionContext {
            rx: self.state.subscribe(),
        }
    }

    pub fn watch(&self) -> watch::Receiver<Option<Session>> {
        self.state.subscribe()
    }

    /// Run `callback` with the new session on every change
    pub fn on_change<F>(&self, mut callback: F) -> Subscription
    where
        F: FnMut(Option<Session>) + Send + 'static,
    {
        let mut rx = self.state.subscribe();
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let session = rx.borrow_and_update().clone();
                callback(session);
            }
        });
        Subscription { task }
    }

    /// Adopt whatever session the provider already holds
    pub async fn restore(&self) -> Result<Option<Session>> {
        let session = self.provider.get_session().await?;
        tracing::debug!(restored = session.is_some(), "session restored");
        self.set(session.clone());
        Ok(session)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(ContentError::Validation(
                "email and password are required".to_string(),
            ));
        }

        let session = self
            .provider
            .sign_in_with_password(email, password)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "sign in failed");
                ContentError::from(e)
            })?;

        tracing::info!(user_id = %session.user_id, "signed in");
        self.set(Some(session.clone()));
        Ok(session)
    }

    /// Create an identity with a unique username.
    ///
    /// The username is checked against existing profiles before the provider
    /// is called, so a taken name never leaves an identity without a profile.
    pub async fn sign_up(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<SignUpOutcome> {
        let username = username.trim();
        let email = email.trim();

        if !validate_username(username) {
            return Err(ContentError::Validation(
                "username: 3-32 letters, digits, '_' or '-'".to_string(),
            ));
        }
        if !validate_email(email) {
            return Err(ContentError::Validation(
                "email: not a valid address".to_string(),
            ));
        }
        if !validate_password(password) {
            return Err(ContentError::Validation(format!(
                "password: must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        if self.repo.username_exists(username).await? {
            tracing::info!(%username, "sign up refused, username taken");
            return Err(ContentError::UsernameTaken(username.to_string()));
        }

        let outcome = self
            .provider
            .sign_up(
                email,
                password,
                SignUpMetadata {
                    username: username.to_string(),
                },
            )
            .await?;

        match &outcome {
            SignUpOutcome::SignedIn(session) => {
                tracing::info!(user_id = %session.user_id, %username, "signed up");
                self.set(Some(session.clone()));
            }
            SignUpOutcome::ConfirmationPending { user_id } => {
                tracing::info!(%user_id, %username, "signed up, confirmation pending");
            }
        }
        Ok(outcome)
    }

    /// Clear the session locally and at the provider.
    ///
    /// Local state is cleared even when the provider call fails.
    pub async fn sign_out(&self) -> Result<()> {
        let result = self.provider.sign_out().await;
        let previous = self.state.send_replace(None);
        if let Some(session) = previous {
            tracing::info!(user_id = %session.user_id, "signed out");
        }

        match result {
            Ok(()) | Err(IdentityError::NoSession) => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "provider sign out failed");
                Err(e.into())
            }
        }
    }

    /// Forward provider-pushed session events into the current state
    pub fn spawn_listener(&self) -> JoinHandle<()> {
        let mut events = self.provider.subscribe();
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let signed_out = matches!(event, AuthEvent::SignedOut);
                        let next = event.into_session();
                        let changed = state.send_if_modified(|current| {
                            if *current == next {
                                false
                            } else {
                                *current = next;
                                true
                            }
                        });
                        tracing::debug!(changed, signed_out, "auth event applied");
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "auth listener lagged");
                    }
                    Err(RecvError::Closed) => {
                        tracing::debug!("auth event stream closed");
                        break;
                    }
                }
            }
        })
    }

    fn set(&self, session: Option<Session>) {
        self.state.send_if_modified(|current| {
            if *current == session {
                false
            } else {
                *current = session;
                true
            }
        });
    }
}
