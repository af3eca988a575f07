/// GoTrue-compatible identity provider client
///
/// Talks to the `/auth/v1` endpoints of a GoTrue auth server:
/// - `POST /auth/v1/token?grant_type=password` sign in
/// - `POST /auth/v1/token?grant_type=refresh_token` refresh an expired session
/// - `POST /auth/v1/signup` create an identity (username stored as user metadata)
/// - `POST /auth/v1/logout` revoke the current session
///
/// The client keeps the session it obtained and pushes every change on a
/// broadcast channel, which is what `AuthSessionManager::spawn_listener`
/// consumes.
use super::{AuthEvent, IdentityError, IdentityProvider, Session, SignUpMetadata, SignUpOutcome};
use crate::config::IdentityConfig;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

const EVENT_BUFFER: usize = 16;

#[derive(Debug, Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshGrant<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
struct SignUpRequest<'a> {
    email: &'a str,
    password: &'a str,
    data: &'a SignUpMetadata,
}

#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: Uuid,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: GoTrueUser,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or_else(|| self.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)));

        Session {
            user_id: self.user.id,
            email: self.user.email,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
        }
    }
}

/// Error payloads differ between GoTrue versions
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

impl ErrorBody {
    fn parse(body: &str) -> String {
        let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
        parsed
            .error_description
            .or(parsed.msg)
            .or(parsed.message)
            .or(parsed.error)
            .unwrap_or_else(|| body.trim().to_string())
    }
}

/// Interpret a sign-up response body.
///
/// With auto-confirm on, GoTrue answers with a full token response; otherwise
/// it returns the new user, either bare or under `user`.
fn parse_sign_up(body: Value) -> Result<SignUpOutcome, IdentityError> {
    let malformed = |e: serde_json::Error| {
        IdentityError::Rejected(format!("unexpected sign up response: {}", e))
    };

    if body.get("access_token").is_some() {
        let token: TokenResponse = serde_json::from_value(body).map_err(malformed)?;
        return Ok(SignUpOutcome::SignedIn(token.into_session()));
    }

    let user_value = match body.get("user") {
        Some(user) if user.is_object() => user.clone(),
        _ => body,
    };
    let user: GoTrueUser = serde_json::from_value(user_value).map_err(malformed)?;
    Ok(SignUpOutcome::ConfirmationPending { user_id: user.id })
}

pub struct GoTrueClient {
    client: Client,
    base_url: String,
    anon_key: String,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

impl GoTrueClient {
    pub fn new(config: &IdentityConfig) -> Result<Self, IdentityError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| IdentityError::Unavailable(format!("http client: {}", e)))?;
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            session: RwLock::new(None),
            events,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn publish(&self, event: AuthEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        bearer: Option<&str>,
    ) -> Result<reqwest::Response, IdentityError> {
        let mut request = self
            .client
            .post(self.endpoint(path))
            .header("apikey", &self.anon_key)
            .json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        request.send().await.map_err(|e| {
            warn!(path, error = %e, "identity request failed");
            IdentityError::Unavailable(e.to_string())
        })
    }

    async fn read_error(response: reqwest::Response) -> (StatusCode, String) {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        (status, ErrorBody::parse(&body))
    }

    async fn token_grant<B: Serialize + ?Sized>(
        &self,
        grant_type: &str,
        body: &B,
    ) -> Result<Session, IdentityError> {
        let response = self
            .post_json(&format!("token?grant_type={}", grant_type), body, None)
            .await?;

        if !response.status().is_success() {
            let (status, message) = Self::read_error(response).await;
            debug!(%status, grant_type, %message, "token grant refused");
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                    IdentityError::InvalidCredentials(message)
                }
                s if s.is_client_error() => IdentityError::Rejected(message),
                _ => IdentityError::Unavailable(format!("{}: {}", status, message)),
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| IdentityError::Unavailable(format!("malformed token response: {}", e)))?;
        Ok(token.into_session())
    }

    /// Forget the stored session, unless another call already replaced it
    async fn drop_session(&self, user_id: Uuid) {
        let mut current = self.session.write().await;
        if current
            .as_ref()
            .is_some_and(|s| s.user_id == user_id && s.is_expired(Utc::now()))
        {
            *current = None;
            drop(current);
            self.publish(AuthEvent::SignedOut);
        }
    }

    /// Exchange the stored refresh token for a new session
    pub async fn refresh(&self) -> Result<Session, IdentityError> {
        let refresh_token = self
            .session
            .read()
            .await
            .as_ref()
            .and_then(|s| s.refresh_token.clone())
            .ok_or(IdentityError::NoSession)?;

        let session = self
            .token_grant(
                "refresh_token",
                &RefreshGrant {
                    refresh_token: &refresh_token,
                },
            )
            .await?;

        *self.session.write().await = Some(session.clone());
        info!(user_id = %session.user_id, "session refreshed");
        self.publish(AuthEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }
}

#[async_trait]
impl IdentityProvider for GoTrueClient {
    async fn get_session(&self) -> Result<Option<Session>, IdentityError> {
        let current = self.session.read().await.clone();
        match current {
            Some(session) if session.is_expired(Utc::now()) => {
                if session.refresh_token.is_none() {
                    self.drop_session(session.user_id).await;
                    return Ok(None);
                }
                match self.refresh().await {
                    Ok(session) => Ok(Some(session)),
                    // a spent or revoked refresh token never recovers
                    Err(
                        IdentityError::InvalidCredentials(message)
                        | IdentityError::Rejected(message),
                    ) => {
                        warn!(user_id = %session.user_id, %message, "refresh refused, session dropped");
                        self.drop_session(session.user_id).await;
                        Ok(None)
                    }
                    Err(err) => Err(err),
                }
            }
            other => Ok(other),
        }
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, IdentityError> {
        let session = self
            .token_grant("password", &PasswordGrant { email, password })
            .await?;

        *self.session.write().await = Some(session.clone());
        info!(user_id = %session.user_id, "identity signed in");
        self.publish(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: SignUpMetadata,
    ) -> Result<SignUpOutcome, IdentityError> {
        let response = self
            .post_json(
                "signup",
                &SignUpRequest {
                    email,
                    password,
                    data: &metadata,
                },
                None,
            )
            .await?;

        if !response.status().is_success() {
            let (status, message) = Self::read_error(response).await;
            debug!(%status, %message, "sign up refused");
            return Err(if status.is_client_error() {
                IdentityError::Rejected(message)
            } else {
                IdentityError::Unavailable(format!("{}: {}", status, message))
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| IdentityError::Unavailable(format!("malformed sign up response: {}", e)))?;
        let outcome = parse_sign_up(body)?;

        if let SignUpOutcome::SignedIn(session) = &outcome {
            *self.session.write().await = Some(session.clone());
            self.publish(AuthEvent::SignedIn(session.clone()));
        }
        info!(username = %metadata.username, "identity created");
        Ok(outcome)
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        let session = self
            .session
            .write()
            .await
            .take()
            .ok_or(IdentityError::NoSession)?;
        self.publish(AuthEvent::SignedOut);

        let response = self
            .post_json("logout", &serde_json::json!({}), Some(&session.access_token))
            .await?;

        let status = response.status();
        if status.is_success() || status.is_client_error() {
            // an already revoked token still means signed out
            debug!(%status, user_id = %session.user_id, "identity signed out");
            Ok(())
        } else {
            let (_, message) = Self::read_error(response).await;
            Err(IdentityError::Unavailable(format!("{}: {}", status, message)))
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
