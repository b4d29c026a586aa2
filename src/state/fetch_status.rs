/// Outcome class of a single page fetch
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents how a page fetch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    /// Page was fetched and rendered
    Success,

    /// Server answered with a non-success status code
    HttpError,

    /// The fetch did not finish within its timeout or wait window
    Timeout,

    /// A script requested by the render config failed or could not run
    ScriptError,

    /// The site refused the request (auth challenge, bot wall, rate limit)
    Blocked,
}

impl FetchStatus {
    /// Returns true if this represents a successful fetch
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Classifies an HTTP status code
    ///
    /// 401, 403, 407 and 429 are treated as the site blocking us; other
    /// non-2xx codes are plain HTTP errors.
    pub fn from_status_code(code: u16) -> Self {
        match code {
            200..=299 => Self::Success,
            401 | 403 | 407 | 429 => Self::Blocked,
            _ => Self::HttpError,
        }
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Same names serde uses
        f.write_str(match self {
            Self::Success => "success",
            Self::HttpError => "http_error",
            Self::Timeout => "timeout",
            Self::ScriptError => "script_error",
            Self::Blocked => "blocked",
        })
    }
}
