use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable principal identifier issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The authenticated principal as last reported by the identity provider.
///
/// The provider owns this data; everything here is a read-only cached copy
/// replaced wholesale on each change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub last_sign_in_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: UserId(user_id.into()),
            display_name: None,
            email: None,
            avatar_url: None,
            last_sign_in_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityProvider {
    Google,
    Github,
    Facebook,
}

impl IdentityProvider {
    /// Wire identifier understood by the hosted provider.
    pub fn provider_id(self) -> &'static str {
        match self {
            IdentityProvider::Google => "google.com",
            IdentityProvider::Github => "github.com",
            IdentityProvider::Facebook => "facebook.com",
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            IdentityProvider::Google => "google",
            IdentityProvider::Github => "github",
            IdentityProvider::Facebook => "facebook",
        }
    }
}

impl fmt::Display for IdentityProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

#[derive(Debug, Error)]
#[error("unknown identity provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for IdentityProvider {
    type Err = UnknownProvider;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "google" | "google.com" => Ok(IdentityProvider::Google),
            "github" | "github.com" => Ok(IdentityProvider::Github),
            "facebook" | "facebook.com" => Ok(IdentityProvider::Facebook),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}
