use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{IdentityProvider, Session},
    error::{AuthError, AuthErrorKind, BLOCKED_HANDOFF_MESSAGE},
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::IdentityService;

const REQUEST_ID_HEADER: &str = "x-client-request-id";
const RATE_LIMITED_MESSAGE: &str = "Too many attempts. Wait a moment and try again.";

/// Connection settings for a hosted identity provider endpoint.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
    pub redirect_uri: String,
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            redirect_uri: "http://localhost/auth/return".to_string(),
        }
    }

    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = redirect_uri.into();
        self
    }
}

/// Opens the provider handoff URL in whatever surface hosts the app
/// (browser tab, webview, terminal instructions).
pub trait RedirectTransport: Send + Sync {
    fn open(&self, url: &Url) -> Result<(), AuthError>;
}

pub struct MissingRedirectTransport;

impl RedirectTransport for MissingRedirectTransport {
    fn open(&self, url: &Url) -> Result<(), AuthError> {
        warn!(url = %url, "auth: no redirect transport configured; handoff blocked");
        Err(AuthError::redirect_blocked())
    }
}

fn classify_provider_code(code: &str) -> Option<(AuthErrorKind, &'static str)> {
    match code {
        "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" => Some((
            AuthErrorKind::InvalidCredentials,
            "Incorrect email or password.",
        )),
        "EMAIL_NOT_FOUND" => Some((
            AuthErrorKind::UserNotFound,
            "No account exists for that email address.",
        )),
        "EMAIL_EXISTS" => Some((
            AuthErrorKind::EmailAlreadyInUse,
            "An account already exists for that email address.",
        )),
        "WEAK_PASSWORD" => Some((
            AuthErrorKind::WeakPassword,
            "Password is too weak. Choose a longer password.",
        )),
        "TOO_MANY_ATTEMPTS_TRY_LATER" => {
            Some((AuthErrorKind::RateLimited, RATE_LIMITED_MESSAGE))
        }
        "POPUP_BLOCKED" | "REDIRECT_BLOCKED" => Some((
            AuthErrorKind::PopupOrRedirectBlocked,
            BLOCKED_HANDOFF_MESSAGE,
        )),
        _ => None,
    }
}

fn transport_failure(action: &'static str, error: &reqwest::Error) -> AuthError {
    error!(action, error = %error, "auth: provider request failed");
    AuthError::unknown()
}

#[derive(Debug, Serialize)]
struct PasswordCredentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct AuthorizeRequest<'a> {
    provider_id: &'a str,
    redirect_uri: &'a str,
    state: String,
}

#[derive(Debug, Deserialize)]
struct AuthorizeResponse {
    handoff_url: String,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorEnvelope {
    error: ProviderErrorDocument,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDocument {
    code: String,
    #[serde(default)]
    message: String,
}

/// [`IdentityService`] backed by a hosted identity provider's REST surface.
///
/// Keeps the provider SDK's client-side session cache and feeds the change
/// notification stream from it: password sign-in, account creation, a
/// completed redirect, and sign-out each replace the cached session and
/// emit.
pub struct IdentityGateway {
    config: GatewayConfig,
    http: Client,
    transport: Arc<dyn RedirectTransport>,
    current: Arc<Mutex<Option<Session>>>,
    changes: broadcast::Sender<Option<Session>>,
}

impl IdentityGateway {
    pub fn new(config: GatewayConfig) -> Arc<Self> {
        Self::with_transport(config, Arc::new(MissingRedirectTransport))
    }

    pub fn with_transport(
        config: GatewayConfig,
        transport: Arc<dyn RedirectTransport>,
    ) -> Arc<Self> {
        let (changes, _) = broadcast::channel(16);
        Arc::new(Self {
            config,
            http: Client::new(),
            transport,
            current: Arc::new(Mutex::new(None)),
            changes,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(self.endpoint(path))
            .query(&[("key", self.config.api_key.as_str())])
            .header(REQUEST_ID_HEADER, Uuid::new_v4().to_string())
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(self.endpoint(path))
            .query(&[("key", self.config.api_key.as_str())])
            .header(REQUEST_ID_HEADER, Uuid::new_v4().to_string())
    }

    async fn replace_session(&self, session: Option<Session>) {
        // The send stays under the lock: emission order must match
        // cache-write order.
        let mut guard = self.current.lock().await;
        *guard = session.clone();
        let _ = self.changes.send(session);
    }

    async fn read_session(
        &self,
        response: reqwest::Response,
        action: &'static str,
    ) -> Result<Session, AuthError> {
        if !response.status().is_success() {
            return Err(self.normalize_failure(response, action).await);
        }
        response.json::<Session>().await.map_err(|error| {
            error!(action, error = %error, "auth: malformed session document from provider");
            AuthError::unknown()
        })
    }

    async fn normalize_failure(
        &self,
        response: reqwest::Response,
        action: &'static str,
    ) -> AuthError {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(action, "auth: provider rate limit hit");
            return AuthError::new(AuthErrorKind::RateLimited, RATE_LIMITED_MESSAGE);
        }
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ProviderErrorEnvelope>(&body) {
            Ok(envelope) => {
                let code = envelope.error.code;
                if let Some((kind, message)) = classify_provider_code(&code) {
                    warn!(action, code = %code, "auth: provider rejected request");
                    AuthError::new(kind, message)
                } else {
                    error!(
                        action,
                        status = status.as_u16(),
                        code = %code,
                        detail = %envelope.error.message,
                        "auth: unrecognized provider error code"
                    );
                    AuthError::unknown()
                }
            }
            Err(_) => {
                error!(
                    action,
                    status = status.as_u16(),
                    body = %body,
                    "auth: provider failure with unrecognized shape"
                );
                AuthError::unknown()
            }
        }
    }
}

#[async_trait]
impl IdentityService for IdentityGateway {
    fn subscribe_session_changes(&self) -> broadcast::Receiver<Option<Session>> {
        let receiver = self.changes.subscribe();
        let sender = self.changes.clone();
        let current = Arc::clone(&self.current);
        // Contract: a new subscriber observes the current known state
        // promptly, not just future changes. The send stays under the
        // cache lock so the snapshot cannot reorder against a concurrent
        // change.
        tokio::spawn(async move {
            let guard = current.lock().await;
            let _ = sender.send(guard.clone());
        });
        receiver
    }

    async fn verify_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let response = self
            .post("v1/auth/sign-in")
            .json(&PasswordCredentials { email, password })
            .send()
            .await
            .map_err(|error| transport_failure("verify_password", &error))?;
        let session = self.read_session(response, "verify_password").await?;
        info!(user_id = %session.user_id, "auth: password verified");
        self.replace_session(Some(session.clone())).await;
        Ok(session)
    }

    async fn create_account(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let response = self
            .post("v1/auth/sign-up")
            .json(&PasswordCredentials { email, password })
            .send()
            .await
            .map_err(|error| transport_failure("create_account", &error))?;
        let session = self.read_session(response, "create_account").await?;
        info!(user_id = %session.user_id, "auth: account created");
        self.replace_session(Some(session.clone())).await;
        Ok(session)
    }

    async fn begin_provider_redirect(
        &self,
        provider: IdentityProvider,
    ) -> Result<(), AuthError> {
        let request = AuthorizeRequest {
            provider_id: provider.provider_id(),
            redirect_uri: &self.config.redirect_uri,
            state: Uuid::new_v4().to_string(),
        };
        let response = self
            .post("v1/auth/oauth/authorize")
            .json(&request)
            .send()
            .await
            .map_err(|error| transport_failure("begin_provider_redirect", &error))?;
        if !response.status().is_success() {
            return Err(self
                .normalize_failure(response, "begin_provider_redirect")
                .await);
        }
        let authorize: AuthorizeResponse = response.json().await.map_err(|error| {
            error!(error = %error, "auth: malformed authorize response from provider");
            AuthError::unknown()
        })?;
        let handoff = Url::parse(&authorize.handoff_url).map_err(|error| {
            error!(
                error = %error,
                url = %authorize.handoff_url,
                "auth: provider returned an invalid handoff url"
            );
            AuthError::unknown()
        })?;
        self.transport.open(&handoff)?;
        info!(provider = %provider, "auth: provider handoff opened");
        Ok(())
    }

    async fn resolve_pending_redirect(&self) -> Result<Option<Session>, AuthError> {
        let response = self
            .get("v1/auth/oauth/result")
            .send()
            .await
            .map_err(|error| transport_failure("resolve_pending_redirect", &error))?;
        if response.status() == StatusCode::NO_CONTENT {
            debug!("auth: no completed redirect sign-in at provider");
            return Ok(None);
        }
        let session = self
            .read_session(response, "resolve_pending_redirect")
            .await?;
        info!(user_id = %session.user_id, "auth: redirect sign-in completed");
        self.replace_session(Some(session.clone())).await;
        Ok(Some(session))
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let response = self
            .post("v1/auth/sign-out")
            .send()
            .await
            .map_err(|error| transport_failure("sign_out", &error))?;
        if !response.status().is_success() {
            return Err(self.normalize_failure(response, "sign_out").await);
        }
        info!("auth: provider session cleared");
        self.replace_session(None).await;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
