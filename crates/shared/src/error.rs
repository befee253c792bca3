use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Normalized failure taxonomy for authentication actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    InvalidCredentials,
    UserNotFound,
    EmailAlreadyInUse,
    WeakPassword,
    RateLimited,
    PopupOrRedirectBlocked,
    Unknown,
}

impl AuthErrorKind {
    /// Kinds whose message is safe to surface verbatim and that the user
    /// can act on by correcting their input (or waiting).
    pub fn user_correctable(self) -> bool {
        matches!(
            self,
            AuthErrorKind::InvalidCredentials
                | AuthErrorKind::UserNotFound
                | AuthErrorKind::EmailAlreadyInUse
                | AuthErrorKind::WeakPassword
                | AuthErrorKind::RateLimited
        )
    }
}

/// Shown for `PopupOrRedirectBlocked`: actionable, never generic.
pub const BLOCKED_HANDOFF_MESSAGE: &str =
    "The sign-in window could not be opened. Allow popups and redirects for this site, then try again.";

/// Shown for `Unknown`; the underlying detail goes to the log, not the user.
pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct AuthError {
    pub kind: AuthErrorKind,
    pub message: String,
}

impl AuthError {
    pub fn new(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn redirect_blocked() -> Self {
        Self::new(AuthErrorKind::PopupOrRedirectBlocked, BLOCKED_HANDOFF_MESSAGE)
    }

    pub fn unknown() -> Self {
        Self::new(AuthErrorKind::Unknown, GENERIC_FAILURE_MESSAGE)
    }
}
