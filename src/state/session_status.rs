use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of an authenticated session for one site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No login has been attempted, or the session was invalidated
    Unauthenticated,

    /// A login is in progress
    Authenticating,

    /// Login succeeded (or was accepted tentatively, see `Session::needs_revalidation`)
    Authenticated,

    /// Login failed; no fetch may use this session
    Failed,
}

impl SessionStatus {
    /// Returns true if fetches may attach this session's cookies
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Authenticated)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "unauthenticated" => Some(Self::Unauthenticated),
            "authenticating" => Some(Self::Authenticating),
            "authenticated" => Some(Self::Authenticated),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}
