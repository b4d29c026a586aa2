//! Authenticated session management
//!
//! # Components
//!
//! - `detection`: locating login controls on a rendered page
//! - `SessionManager`: performs logins, hands session cookies to fetches,
//!   and re-authenticates once when a fetch hits an auth challenge

pub mod detection;
mod manager;

pub use detection::{detect_login_form, DetectedForm, SelectorOverrides};
pub use manager::{AuthSite, SessionManager};

use crate::config::AuthEntry;
use crate::render::FetchError;
use crate::state::SessionStatus;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Login control that could not be located
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginField {
    Username,
    Password,
    Submit,
}

impl fmt::Display for LoginField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Username => "username",
            Self::Password => "password",
            Self::Submit => "submit",
        })
    }
}

/// Login failures, by stage
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Login {field} control not found on {url}")]
    SelectorNotFound { field: LoginField, url: String },

    #[error("Post-login selector '{selector}' did not appear within {waited_ms}ms")]
    VerificationTimeout { selector: String, waited_ms: u64 },

    #[error("Credentials rejected: still on login page {url}")]
    CredentialRejected { url: String },

    #[error("Auth challenge persisted after re-login for {url}")]
    ChallengePersisted { url: String },

    #[error("Fetch failed during login: {0}")]
    LoginFetch(FetchError),
}

impl AuthError {
    /// Name of the stage that failed
    pub fn stage(&self) -> &'static str {
        match self {
            Self::SelectorNotFound { .. } => "selector-not-found",
            Self::VerificationTimeout { .. } => "verification-timeout",
            Self::CredentialRejected { .. } => "credential-rejected",
            Self::ChallengePersisted { .. } => "challenge-persisted",
            Self::LoginFetch(_) => "login-fetch",
        }
    }

    /// Returns true if this failure marks the session as failed
    ///
    /// A network problem while loading the login page says nothing about
    /// the credentials, so it leaves the session retryable.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::LoginFetch(_))
    }
}

/// A username/password pair
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How to log in to a site and how to tell that it worked
#[derive(Debug, Clone)]
pub struct LoginSpec {
    /// Login page; when unset the URL being fetched is used
    pub login_url: Option<String>,
    pub selectors: SelectorOverrides,
    /// Selector that is only present once logged in
    pub success_selector: Option<String>,
    /// Treat "still on the login page" after submit as rejected credentials
    pub verify_url_change: bool,
    pub settle_delay: Duration,
    pub verify_timeout: Duration,
    pub verify_poll: Duration,
    /// Maximum age of a session before it is re-established
    pub session_ttl: Duration,
}

impl Default for LoginSpec {
    fn default() -> Self {
        Self {
            login_url: None,
            selectors: SelectorOverrides::default(),
            success_selector: None,
            verify_url_change: true,
            settle_delay: Duration::from_millis(500),
            verify_timeout: Duration::from_secs(10),
            verify_poll: Duration::from_millis(250),
            session_ttl: Duration::from_secs(3600),
        }
    }
}

impl LoginSpec {
    pub fn from_entry(entry: &AuthEntry) -> Self {
        Self {
            login_url: entry.login_url.clone(),
            selectors: SelectorOverrides {
                username: entry.username_selector.clone(),
                password: entry.password_selector.clone(),
                submit: entry.submit_selector.clone(),
            },
            success_selector: entry.success_selector.clone(),
            verify_url_change: entry.verify_url_change,
            settle_delay: Duration::from_millis(entry.settle_delay_ms),
            verify_timeout: Duration::from_millis(entry.verify_timeout_ms),
            session_ttl: Duration::from_secs(entry.session_ttl_secs),
            ..Self::default()
        }
    }
}

/// Authenticated state for one site
#[derive(Clone)]
pub struct Session {
    pub site_key: String,
    pub username: String,
    pub status: SessionStatus,
    /// Login page the session was established through
    pub login_url: Option<String>,
    pub username_selector: Option<String>,
    pub password_selector: Option<String>,
    pub submit_selector: Option<String>,
    pub cookies: BTreeMap<String, String>,
    pub established_at: Option<DateTime<Utc>>,
    /// Bumped on every successful login; used to invalidate at most once per challenge
    pub generation: u64,
    pub login_count: u32,
    /// Login could not be verified; the first content fetch decides
    pub needs_revalidation: bool,
    pub last_error: Option<AuthError>,
}

impl Session {
    pub fn new(site_key: &str, username: &str) -> Self {
        Self {
            site_key: site_key.to_string(),
            username: username.to_string(),
            status: SessionStatus::Unauthenticated,
            login_url: None,
            username_selector: None,
            password_selector: None,
            submit_selector: None,
            cookies: BTreeMap::new(),
            established_at: None,
            generation: 0,
            login_count: 0,
            needs_revalidation: false,
            last_error: None,
        }
    }

    /// Returns true if the session is authenticated and within `ttl`
    pub fn is_valid(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        if !self.status.is_usable() {
            return false;
        }
        match (self.established_at, chrono::Duration::from_std(ttl)) {
            (Some(at), Ok(ttl)) => now - at < ttl,
            (Some(_), Err(_)) => true,
            (None, _) => false,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("site_key", &self.site_key)
            .field("username", &self.username)
            .field("status", &self.status)
            .field("cookies", &self.cookies.keys().collect::<Vec<_>>())
            .field("established_at", &self.established_at)
            .field("generation", &self.generation)
            .field("needs_revalidation", &self.needs_revalidation)
            .finish_non_exhaustive()
    }
}
