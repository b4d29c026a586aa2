//! Status types shared across the crawl engine
//!
//! # Components
//!
//! - `FetchStatus`: outcome class of one page fetch (success, http error, timeout, ...)
//! - `SessionStatus`: lifecycle of an authenticated session

mod fetch_status;
mod session_status;

pub use fetch_status::FetchStatus;
pub use session_status::SessionStatus;
