use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use shared::{
    domain::{IdentityProvider, Session},
    error::{AuthError, AuthErrorKind},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub mod gateway;

pub use gateway::{GatewayConfig, IdentityGateway, MissingRedirectTransport, RedirectTransport};

/// Snapshot of the controller's view of the authenticated principal.
///
/// `pending` starts out `true`: before the first change notification the
/// session is unknown, not signed out. `last_error` holds the outcome of the
/// most recently settled action and is cleared by every new action and every
/// change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerState {
    pub session: Option<Session>,
    pub pending: bool,
    pub last_error: Option<AuthError>,
}

/// Application routes the controller is allowed to navigate to.
#[derive(Debug, Clone)]
pub struct Routes {
    pub landing: String,
    pub sign_in: String,
}

impl Default for Routes {
    fn default() -> Self {
        Self {
            landing: "/dashboard".to_string(),
            sign_in: "/auth/login".to_string(),
        }
    }
}

/// External identity provider, consumed as a black box.
///
/// Implementations own account verification, account creation, the
/// redirect handoff transport, and the session itself; the controller only
/// observes. All failures are reported as normalized [`AuthError`] values.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Stream of session replacements. Implementations emit the current
    /// known state promptly after a subscriber attaches, then once per
    /// change. Dropping the receiver unsubscribes.
    fn subscribe_session_changes(&self) -> broadcast::Receiver<Option<Session>>;

    /// Fails with `InvalidCredentials`, `UserNotFound`, `RateLimited`, or
    /// `Unknown` for transport failures.
    async fn verify_password(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    /// Fails with `EmailAlreadyInUse`, `WeakPassword`, or `Unknown`.
    async fn create_account(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    /// Initiates the full-page provider handoff without returning a
    /// session. Fails with `PopupOrRedirectBlocked` when the handoff cannot
    /// be opened.
    async fn begin_provider_redirect(&self, provider: IdentityProvider) -> Result<(), AuthError>;

    /// Returns the session left behind by a redirect flow that completed
    /// since the last page load, if any. Called once at startup.
    async fn resolve_pending_redirect(&self) -> Result<Option<Session>, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;
}

/// Route sink for the single navigation the controller performs on
/// successful sign-in.
pub trait Navigator: Send + Sync {
    fn navigate_to(&self, path: &str);
}

fn service_unavailable() -> AuthError {
    AuthError::new(AuthErrorKind::Unknown, "identity service not configured")
}

pub struct MissingIdentityService;

#[async_trait]
impl IdentityService for MissingIdentityService {
    fn subscribe_session_changes(&self) -> broadcast::Receiver<Option<Session>> {
        let (_sender, receiver) = broadcast::channel(1);
        receiver
    }

    async fn verify_password(&self, _email: &str, _password: &str) -> Result<Session, AuthError> {
        Err(service_unavailable())
    }

    async fn create_account(&self, _email: &str, _password: &str) -> Result<Session, AuthError> {
        Err(service_unavailable())
    }

    async fn begin_provider_redirect(
        &self,
        _provider: IdentityProvider,
    ) -> Result<(), AuthError> {
        Err(service_unavailable())
    }

    async fn resolve_pending_redirect(&self) -> Result<Option<Session>, AuthError> {
        Err(service_unavailable())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        Err(service_unavailable())
    }
}

pub struct MissingNavigator;

impl Navigator for MissingNavigator {
    fn navigate_to(&self, path: &str) {
        warn!(path, "auth: navigation requested but no navigator is configured");
    }
}

struct ControllerTasks {
    listener: JoinHandle<()>,
    reconciliation: JoinHandle<()>,
}

/// Observes the identity service's session changes and runs authentication
/// actions, exposing one `(session, pending, last_error)` state to any
/// number of subscribers.
///
/// The change-notification listener is the only writer of `session`; action
/// methods settle `pending`/`last_error` and return the same normalized
/// error they record.
pub struct SessionController {
    identity: Arc<dyn IdentityService>,
    navigator: Arc<dyn Navigator>,
    routes: Routes,
    inner: Mutex<ControllerState>,
    changes: broadcast::Sender<ControllerState>,
    tasks: Mutex<Option<ControllerTasks>>,
}

impl SessionController {
    pub fn new(identity: Arc<dyn IdentityService>) -> Arc<Self> {
        Self::new_with_navigator(identity, Arc::new(MissingNavigator), Routes::default())
    }

    pub fn new_with_navigator(
        identity: Arc<dyn IdentityService>,
        navigator: Arc<dyn Navigator>,
        routes: Routes,
    ) -> Arc<Self> {
        let (changes, _) = broadcast::channel(64);
        Arc::new(Self {
            identity,
            navigator,
            routes,
            inner: Mutex::new(ControllerState {
                session: None,
                pending: true,
                last_error: None,
            }),
            changes,
            tasks: Mutex::new(None),
        })
    }

    /// Subscribes to the identity service and reconciles any redirect
    /// sign-in left over from a previous page load. Idempotent: the
    /// subscription is created once, a second call is ignored.
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_some() {
            warn!("auth: start called twice; keeping the existing subscription");
            return;
        }
        *tasks = Some(ControllerTasks {
            listener: self.spawn_change_listener(),
            reconciliation: self.spawn_redirect_reconciliation(),
        });
        info!("auth: session controller started");
    }

    /// Releases the change subscription. After this returns no further
    /// notification can mutate controller state.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        if let Some(tasks) = tasks.take() {
            tasks.listener.abort();
            tasks.reconciliation.abort();
            info!("auth: session controller stopped");
        }
    }

    pub async fn state(&self) -> ControllerState {
        self.inner.lock().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerState> {
        self.changes.subscribe()
    }

    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(), AuthError> {
        self.begin_action("sign_in_with_password").await;
        match self.identity.verify_password(email, password).await {
            Ok(session) => {
                info!(user_id = %session.user_id, "auth: password sign-in accepted");
                self.settle_success("sign_in_with_password").await;
                self.navigator.navigate_to(&self.routes.landing);
                Ok(())
            }
            Err(error) => Err(self.settle_failure("sign_in_with_password", error).await),
        }
    }

    pub async fn register_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(), AuthError> {
        self.begin_action("register_with_password").await;
        match self.identity.create_account(email, password).await {
            Ok(session) => {
                info!(user_id = %session.user_id, "auth: account registered");
                self.settle_success("register_with_password").await;
                self.navigator.navigate_to(&self.routes.landing);
                Ok(())
            }
            Err(error) => Err(self.settle_failure("register_with_password", error).await),
        }
    }

    pub async fn sign_in_with_provider(
        &self,
        provider: IdentityProvider,
    ) -> Result<(), AuthError> {
        self.begin_action("sign_in_with_provider").await;
        match self.identity.begin_provider_redirect(provider).await {
            Ok(()) => {
                // The handoff navigates the page itself; the session lands
                // later through a notification or startup reconciliation.
                info!(provider = %provider, "auth: provider handoff initiated");
                self.settle_success("sign_in_with_provider").await;
                Ok(())
            }
            Err(error) => Err(self.settle_failure("sign_in_with_provider", error).await),
        }
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.begin_action("sign_out").await;
        match self.identity.sign_out().await {
            Ok(()) => {
                info!("auth: sign-out accepted");
                self.settle_success("sign_out").await;
                Ok(())
            }
            Err(error) => Err(self.settle_failure("sign_out", error).await),
        }
    }

    fn spawn_change_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut notifications = self.identity.subscribe_session_changes();
        let controller = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(session) => {
                        let Some(controller) = controller.upgrade() else {
                            break;
                        };
                        controller.apply_notification(session).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "auth: change notifications lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn spawn_redirect_reconciliation(&self) -> JoinHandle<()> {
        let identity = Arc::clone(&self.identity);
        let navigator = Arc::clone(&self.navigator);
        let landing = self.routes.landing.clone();
        // Advisory reconciliation: navigation only, never session or error
        // state. The task holds no controller reference.
        tokio::spawn(async move {
            match identity.resolve_pending_redirect().await {
                Ok(Some(session)) => {
                    info!(user_id = %session.user_id, "auth: completed redirect sign-in found");
                    navigator.navigate_to(&landing);
                }
                Ok(None) => debug!("auth: no pending redirect sign-in"),
                Err(error) => {
                    debug!(kind = ?error.kind, "auth: redirect reconciliation failed")
                }
            }
        })
    }

    async fn apply_notification(&self, session: Option<Session>) {
        // Snapshots are sent while the state lock is held; subscribers
        // see them in write order.
        let mut guard = self.inner.lock().await;
        guard.session = session;
        guard.pending = false;
        guard.last_error = None;
        info!(
            signed_in = guard.session.is_some(),
            "auth: session replaced from provider notification"
        );
        let _ = self.changes.send(guard.clone());
    }

    async fn begin_action(&self, action: &'static str) {
        let mut guard = self.inner.lock().await;
        guard.pending = true;
        guard.last_error = None;
        debug!(action, "auth: action started");
        let _ = self.changes.send(guard.clone());
    }

    async fn settle_success(&self, action: &'static str) {
        let mut guard = self.inner.lock().await;
        guard.pending = false;
        guard.last_error = None;
        debug!(action, "auth: action settled");
        let _ = self.changes.send(guard.clone());
    }

    async fn settle_failure(&self, action: &'static str, error: AuthError) -> AuthError {
        let mut guard = self.inner.lock().await;
        guard.pending = false;
        guard.last_error = Some(error.clone());
        warn!(action, kind = ?error.kind, "auth: action failed");
        let _ = self.changes.send(guard.clone());
        error
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.try_lock() {
            if let Some(tasks) = tasks.take() {
                tasks.listener.abort();
                tasks.reconciliation.abort();
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
