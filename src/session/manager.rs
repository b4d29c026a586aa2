use super::detection::detect_login_form;
use super::{AuthError, Credentials, LoginSpec, Session};
use crate::batch::TaskError;
use crate::config::AuthEntry;
use crate::render::parser::contains_selector;
use crate::render::{FetchError, FetchResult, RenderClient, RenderConfig};
use crate::state::{FetchStatus, SessionStatus};
use crate::storage::{SessionRecord, SharedStorage, Storage};
use crate::url::{normalize_url, DomainAllowList};
use crate::ConfigError;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;
use url::Url;

/// Credentials and login description for the hosts matching one pattern
#[derive(Debug, Clone)]
pub struct AuthSite {
    /// Host pattern; also the session key
    pub key: String,
    hosts: DomainAllowList,
    pub credentials: Credentials,
    pub spec: LoginSpec,
}

impl AuthSite {
    pub fn new(pattern: &str, credentials: Credentials, spec: LoginSpec) -> Self {
        Self {
            key: pattern.trim().to_lowercase(),
            hosts: DomainAllowList::new([pattern]),
            credentials,
            spec,
        }
    }

    /// Builds a site from an `[[auth]]` entry, resolving `password-env`
    pub fn from_entry(entry: &AuthEntry) -> Result<Self, ConfigError> {
        let password = entry.resolve_password().ok_or_else(|| {
            ConfigError::Validation(format!(
                "No password available for auth site '{}'",
                entry.site
            ))
        })?;
        Ok(Self::new(
            &entry.site,
            Credentials::new(entry.username.clone(), password),
            LoginSpec::from_entry(entry),
        ))
    }

    pub fn matches(&self, url: &Url) -> bool {
        !self.hosts.is_unrestricted() && self.hosts.allows(url)
    }
}

/// What a successful login produced
struct Established {
    cookies: BTreeMap<String, String>,
    username_selector: String,
    password_selector: String,
    submit_selector: Option<String>,
    tentative: bool,
}

/// Owns the authenticated sessions of a process
///
/// There is one session per site key. Logins for the same site are
/// serialized: concurrent fetches that need a session wait for the single
/// login in progress instead of starting their own.
pub struct SessionManager {
    client: Arc<dyn RenderClient>,
    sites: Vec<AuthSite>,
    sessions: Mutex<HashMap<String, Arc<tokio::sync::Mutex<Session>>>>,
    storage: Option<SharedStorage>,
}

impl SessionManager {
    pub fn new(client: Arc<dyn RenderClient>) -> Self {
        Self {
            client,
            sites: Vec::new(),
            sessions: Mutex::new(HashMap::new()),
            storage: None,
        }
    }

    /// Builds a manager for every `[[auth]]` entry
    pub fn from_config(
        client: Arc<dyn RenderClient>,
        entries: &[AuthEntry],
        storage: Option<SharedStorage>,
    ) -> Result<Self, ConfigError> {
        let sites = entries
            .iter()
            .map(AuthSite::from_entry)
            .collect::<Result<Vec<_>, _>>()?;

        let mut manager = Self::new(client).with_sites(sites);
        manager.storage = storage;
        Ok(manager)
    }

    pub fn with_sites(mut self, sites: Vec<AuthSite>) -> Self {
        self.sites.extend(sites);
        self
    }

    pub fn with_storage(mut self, storage: SharedStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Finds the site whose credentials apply to `url`
    pub fn site_for_url(&self, url: &str) -> Option<&AuthSite> {
        let parsed = Url::parse(url).ok()?;
        self.sites.iter().find(|site| site.matches(&parsed))
    }

    fn slot(&self, site_key: &str, username: &str) -> Arc<tokio::sync::Mutex<Session>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            sessions
                .entry(site_key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(Session::new(site_key, username)))),
        )
    }

    /// Snapshot of the current session for a site
    pub async fn session(&self, site_key: &str) -> Option<Session> {
        let slot = {
            let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            sessions.get(site_key).cloned()
        }?;
        let session = slot.lock().await;
        Some(session.clone())
    }

    /// Returns an authenticated session, logging in only if needed
    ///
    /// An existing session is reused while it is authenticated and within
    /// its TTL. A session whose login failed stays failed, and keeps
    /// returning the original error, until [`SessionManager::reset`].
    ///
    /// # Arguments
    ///
    /// * `site_key` - Session key, usually the site's host pattern
    /// * `credentials` - Username and password to log in with
    /// * `spec` - Login page, selector overrides and verification policy
    /// * `target_url` - Used as the login page when `spec.login_url` is unset
    pub async fn ensure_session(
        &self,
        site_key: &str,
        credentials: &Credentials,
        spec: &LoginSpec,
        target_url: &str,
    ) -> Result<Session, AuthError> {
        let slot = self.slot(site_key, &credentials.username);
        let mut session = slot.lock().await;

        if session.username != credentials.username {
            *session = Session::new(site_key, &credentials.username);
        }

        match session.status {
            SessionStatus::Failed => {
                return Err(session.last_error.clone().unwrap_or_else(|| {
                    AuthError::CredentialRejected {
                        url: session.login_url.clone().unwrap_or_default(),
                    }
                }));
            }
            SessionStatus::Authenticated if session.is_valid(spec.session_ttl, Utc::now()) => {
                return Ok(session.clone());
            }
            _ => {}
        }

        if session.generation == 0 && self.restore(&mut session, spec, target_url) {
            return Ok(session.clone());
        }

        self.login(&mut session, credentials, spec, target_url).await?;
        Ok(session.clone())
    }

    /// Marks a session unauthenticated if it is still the one a caller used
    ///
    /// Returns false when the session was already replaced, so concurrent
    /// callers hitting the same challenge trigger a single re-login.
    pub async fn invalidate(&self, site_key: &str, generation: u64) -> bool {
        let slot = {
            let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            sessions.get(site_key).cloned()
        };
        let Some(slot) = slot else {
            return false;
        };

        let mut session = slot.lock().await;
        if session.generation != generation || session.status != SessionStatus::Authenticated {
            return false;
        }

        tracing::debug!("Invalidating session for {} (generation {})", site_key, generation);
        session.status = SessionStatus::Unauthenticated;
        session.cookies.clear();
        session.needs_revalidation = false;
        true
    }

    /// Forgets a session, including a failed one, so the next request logs in again
    pub async fn reset(&self, site_key: &str) {
        let slot = {
            let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            sessions.remove(site_key)
        };
        if let Some(slot) = slot {
            let _ = slot.lock().await;
        }

        if let Some(storage) = &self.storage {
            let mut storage = storage.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = storage.delete_session(site_key) {
                tracing::warn!("Failed to delete persisted session for {}: {}", site_key, e);
            }
        }
    }

    /// Fetches a page, attaching the session of the site it belongs to
    ///
    /// URLs that match no configured site are fetched without a session. If
    /// a fetch that used a session lands on an auth challenge, the session is
    /// invalidated and exactly one re-login is attempted before the fetch is
    /// reported as `ChallengePersisted`.
    pub async fn fetch(&self, url: &str, config: &RenderConfig) -> Result<FetchResult, TaskError> {
        let Some(site) = self.site_for_url(url) else {
            return self.client.render(url, config).await.map_err(TaskError::Fetch);
        };

        let session = self
            .ensure_session(&site.key, &site.credentials, &site.spec, url)
            .await?;
        let sent = config.with_cookies(&session.cookies);
        let result = self.client.render(url, &sent).await?;

        if !is_auth_challenge(url, &result, &session) {
            self.absorb(site, &session, &sent.cookies, &result).await;
            return Ok(result);
        }

        // An unverified login that gets bounced was never a login
        if session.needs_revalidation {
            let error = AuthError::CredentialRejected {
                url: result.final_url.clone(),
            };
            tracing::warn!("Unverified login to {} bounced by {}", site.key, url);
            self.fail(&site.key, &session, error.clone()).await;
            return Err(TaskError::Auth(error));
        }

        tracing::warn!(
            "Auth challenge fetching {} for site {}, re-authenticating",
            url,
            site.key
        );
        self.invalidate(&site.key, session.generation).await;

        let session = self
            .ensure_session(&site.key, &site.credentials, &site.spec, url)
            .await?;
        let sent = config.with_cookies(&session.cookies);
        let result = self.client.render(url, &sent).await?;

        if is_auth_challenge(url, &result, &session) {
            let error = AuthError::ChallengePersisted {
                url: url.to_string(),
            };
            self.fail(&site.key, &session, error.clone()).await;
            return Err(TaskError::Auth(error));
        }

        self.absorb(site, &session, &sent.cookies, &result).await;
        Ok(result)
    }

    /// Marks the session a fetch used as failed so no further logins are attempted
    async fn fail(&self, site_key: &str, used: &Session, error: AuthError) {
        let slot = self.slot(site_key, &used.username);
        let mut session = slot.lock().await;
        if session.generation != used.generation || session.status == SessionStatus::Failed {
            return;
        }
        tracing::warn!("Session for {} failed at {}: {}", site_key, error.stage(), error);
        session.status = SessionStatus::Failed;
        session.cookies.clear();
        session.needs_revalidation = false;
        session.last_error = Some(error);
        self.persist(&session);
    }

    /// Records that a session worked and adopts the site's view of its cookies
    ///
    /// Cookies the site set, changed or deleted on one of its own pages are
    /// taken over. Caller cookies that came back unchanged stay out of the session.
    async fn absorb(
        &self,
        site: &AuthSite,
        used: &Session,
        sent: &BTreeMap<String, String>,
        result: &FetchResult,
    ) {
        let on_site = Url::parse(&result.final_url)
            .map(|landed| site.matches(&landed))
            .unwrap_or(false);
        let refreshed = on_site && result.cookies != *sent;
        if !used.needs_revalidation && !refreshed {
            return;
        }
        let slot = self.slot(&site.key, &used.username);
        let mut session = slot.lock().await;
        if session.generation != used.generation {
            return;
        }
        if session.needs_revalidation {
            tracing::debug!("Session for {} confirmed by first content fetch", site.key);
            session.needs_revalidation = false;
        }
        if refreshed {
            tracing::debug!("Cookies for {} changed while fetching {}", site.key, result.url);
            session.cookies = result
                .cookies
                .iter()
                .filter(|(name, value)| {
                    used.cookies.contains_key(*name) || sent.get(*name) != Some(*value)
                })
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            self.persist(&session);
        }
    }

    async fn login(
        &self,
        session: &mut Session,
        credentials: &Credentials,
        spec: &LoginSpec,
        target_url: &str,
    ) -> Result<(), AuthError> {
        let login_url = spec
            .login_url
            .clone()
            .unwrap_or_else(|| target_url.to_string());

        session.status = SessionStatus::Authenticating;
        session.login_url = Some(login_url.clone());
        session.login_count += 1;
        tracing::info!(
            "Logging in to {} as {} via {}",
            session.site_key,
            credentials.username,
            login_url
        );

        match self.attempt_login(credentials, spec, &login_url).await {
            Ok(established) => {
                session.status = SessionStatus::Authenticated;
                session.cookies = established.cookies;
                session.username_selector = Some(established.username_selector);
                session.password_selector = Some(established.password_selector);
                session.submit_selector = established.submit_selector;
                session.established_at = Some(Utc::now());
                session.generation += 1;
                session.needs_revalidation = established.tentative;
                session.last_error = None;
                if established.tentative {
                    tracing::info!(
                        "Login to {} could not be verified; will confirm on first fetch",
                        session.site_key
                    );
                } else {
                    tracing::info!("Logged in to {}", session.site_key);
                }
                self.persist(session);
                Ok(())
            }
            Err(e) => {
                session.cookies.clear();
                session.status = if e.is_terminal() {
                    SessionStatus::Failed
                } else {
                    SessionStatus::Unauthenticated
                };
                session.last_error = Some(e.clone());
                tracing::warn!("Login to {} failed at {}: {}", session.site_key, e.stage(), e);
                self.persist(session);
                Err(e)
            }
        }
    }

    async fn attempt_login(
        &self,
        credentials: &Credentials,
        spec: &LoginSpec,
        login_url: &str,
    ) -> Result<Established, AuthError> {
        let page = self
            .client
            .render(login_url, &RenderConfig::default())
            .await
            .map_err(AuthError::LoginFetch)?;
        let page_url = Url::parse(&page.final_url)
            .map_err(|e| AuthError::LoginFetch(FetchError::Network(e.to_string())))?;

        let form = detect_login_form(&page.html, &page_url, &spec.selectors)?;
        tracing::debug!(
            "Login form on {}: username '{}', password '{}', submit {:?}",
            page.final_url,
            form.username_selector,
            form.password_selector,
            form.submit_selector
        );

        let submission = form.fill(credentials, &page.final_url);
        let landed = self
            .client
            .submit_form(
                &submission,
                &RenderConfig {
                    cookies: page.cookies.clone(),
                    ..RenderConfig::default()
                },
            )
            .await
            .map_err(AuthError::LoginFetch)?;
        let mut jar = landed.cookies.clone();

        if !spec.settle_delay.is_zero() {
            tokio::time::sleep(spec.settle_delay).await;
        }

        let left_login_page = !same_page(&landed.final_url, login_url)
            && !same_page(&landed.final_url, &page.final_url);

        let tentative = if spec.verify_url_change && left_login_page {
            false
        } else if let Some(selector) = &spec.success_selector {
            self.wait_for_success(selector, landed, &mut jar, spec).await?;
            false
        } else if spec.verify_url_change {
            return Err(AuthError::CredentialRejected {
                url: landed.final_url,
            });
        } else {
            true
        };

        Ok(Established {
            cookies: jar,
            username_selector: form.username_selector,
            password_selector: form.password_selector,
            submit_selector: form.submit_selector,
            tentative,
        })
    }

    /// Polls the post-login page until `selector` shows up or the wait window closes
    async fn wait_for_success(
        &self,
        selector: &str,
        landed: FetchResult,
        jar: &mut BTreeMap<String, String>,
        spec: &LoginSpec,
    ) -> Result<(), AuthError> {
        let started = Instant::now();
        let deadline = started + spec.verify_timeout;
        let mut current = landed;

        loop {
            if contains_selector(&current.html, selector) {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(AuthError::VerificationTimeout {
                    selector: selector.to_string(),
                    waited_ms: (now - started).as_millis() as u64,
                });
            }

            tokio::time::sleep(spec.verify_poll.min(deadline - now)).await;
            current = self
                .client
                .render(
                    &current.final_url,
                    &RenderConfig {
                        cookies: jar.clone(),
                        ..RenderConfig::default()
                    },
                )
                .await
                .map_err(AuthError::LoginFetch)?;
            *jar = current.cookies.clone();
        }
    }

    /// Adopts a persisted session that is still fresh
    ///
    /// The login page is recorded as [`SessionManager::login`] would, so a
    /// restored session that the site bounces is recognised as challenged.
    fn restore(&self, session: &mut Session, spec: &LoginSpec, target_url: &str) -> bool {
        let Some(storage) = &self.storage else {
            return false;
        };

        let record = {
            let storage = storage.lock().unwrap_or_else(PoisonError::into_inner);
            storage.load_session(&session.site_key)
        };

        match record {
            Ok(Some(record))
                if record.username == session.username
                    && record.is_fresh(spec.session_ttl.as_secs(), Utc::now()) =>
            {
                tracing::info!("Reusing persisted session for {}", session.site_key);
                session.status = SessionStatus::Authenticated;
                session.login_url = Some(
                    spec.login_url
                        .clone()
                        .unwrap_or_else(|| target_url.to_string()),
                );
                session.cookies = record.cookies;
                session.established_at = record.established_at;
                session.generation = 1;
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::warn!("Failed to load session for {}: {}", session.site_key, e);
                false
            }
        }
    }

    fn persist(&self, session: &Session) {
        let Some(storage) = &self.storage else {
            return;
        };

        let record = SessionRecord {
            site_key: session.site_key.clone(),
            username: session.username.clone(),
            status: session.status,
            cookies: session.cookies.clone(),
            established_at: session.established_at,
            updated_at: Utc::now(),
            last_error: session.last_error.as_ref().map(|e| e.to_string()),
        };

        let mut storage = storage.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = storage.save_session(&record) {
            tracing::warn!("Failed to persist session for {}: {}", session.site_key, e);
        }
    }
}

/// Compares scheme, host and path of two URLs after normalization
fn same_page(a: &str, b: &str) -> bool {
    match (normalize_url(a), normalize_url(b)) {
        (Ok(a), Ok(b)) => a.scheme() == b.scheme() && a.host_str() == b.host_str() && a.path() == b.path(),
        _ => a.trim() == b.trim(),
    }
}

/// Returns true if a fetch that used `session` was bounced by the site
fn is_auth_challenge(url: &str, result: &FetchResult, session: &Session) -> bool {
    if result.status == FetchStatus::Blocked && matches!(result.status_code, Some(401 | 403 | 407)) {
        return true;
    }
    match &session.login_url {
        Some(login_url) => !same_page(url, login_url) && same_page(&result.final_url, login_url),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::scripted::ScriptedClient;
    use crate::session::LoginField;
    use crate::storage::SqliteStorage;
    use std::time::Duration;

    const LOGIN: &str = "https://app.example.com/login";
    const HOME: &str = "https://app.example.com/home";
    const REPORTS: &str = "https://app.example.com/reports";

    fn site_client() -> ScriptedClient {
        ScriptedClient::new()
            .login(LOGIN, HOME, "s3cret", "sid")
            .html(HOME, r#"<div class="dashboard">hi</div>"#)
            .protected(HOME)
            .protected(REPORTS)
            .page(REPORTS, &[])
    }

    fn spec() -> LoginSpec {
        LoginSpec {
            login_url: Some(LOGIN.to_string()),
            settle_delay: Duration::ZERO,
            verify_timeout: Duration::from_millis(200),
            verify_poll: Duration::from_millis(20),
            ..LoginSpec::default()
        }
    }

    fn manager(client: &ScriptedClient, password: &str, spec: LoginSpec) -> SessionManager {
        SessionManager::new(Arc::new(client.clone())).with_sites(vec![AuthSite::new(
            "app.example.com",
            Credentials::new("alice", password),
            spec,
        )])
    }

    #[tokio::test]
    async fn test_login_then_reuse() {
        let client = site_client();
        let manager = manager(&client, "s3cret", spec());

        let first = manager.fetch(REPORTS, &RenderConfig::default()).await.unwrap();
        assert_eq!(first.final_url, REPORTS);
        let second = manager.fetch(HOME, &RenderConfig::default()).await.unwrap();
        assert!(second.html.contains("dashboard"));

        assert_eq!(client.submits(), 1);
        let session = manager.session("app.example.com").await.unwrap();
        assert_eq!(session.status, SessionStatus::Authenticated);
        assert_eq!(session.login_count, 1);
        assert_eq!(session.username_selector.as_deref(), Some("#username"));
        assert!(session.cookies.contains_key("sid"));
    }

    #[tokio::test]
    async fn test_wrong_password_fails_without_fetching() {
        let client = site_client();
        let manager = manager(&client, "wrong", spec());

        let err = manager.fetch(REPORTS, &RenderConfig::default()).await.unwrap_err();
        assert!(matches!(
            err,
            TaskError::Auth(AuthError::CredentialRejected { .. })
        ));
        assert_eq!(client.render_count(REPORTS), 0);

        let session = manager.session("app.example.com").await.unwrap();
        assert_eq!(session.status, SessionStatus::Failed);

        // Failed sessions stay failed: no second login attempt
        let err = manager.fetch(REPORTS, &RenderConfig::default()).await.unwrap_err();
        assert!(matches!(
            err,
            TaskError::Auth(AuthError::CredentialRejected { .. })
        ));
        assert_eq!(client.submits(), 1);
    }

    #[tokio::test]
    async fn test_wrong_password_with_success_selector_times_out() {
        let client = site_client();
        let spec = LoginSpec {
            verify_url_change: false,
            success_selector: Some(".dashboard".to_string()),
            ..spec()
        };
        let manager = manager(&client, "wrong", spec);

        let err = manager.fetch(REPORTS, &RenderConfig::default()).await.unwrap_err();
        match err {
            TaskError::Auth(e) => assert_eq!(e.stage(), "verification-timeout"),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(client.render_count(REPORTS), 0);
    }

    #[tokio::test]
    async fn test_success_selector_confirms_login() {
        let client = site_client();
        let spec = LoginSpec {
            verify_url_change: false,
            success_selector: Some(".dashboard".to_string()),
            ..spec()
        };
        let manager = manager(&client, "s3cret", spec);

        assert!(manager.fetch(REPORTS, &RenderConfig::default()).await.is_ok());
        let session = manager.session("app.example.com").await.unwrap();
        assert!(!session.needs_revalidation);
    }

    #[tokio::test]
    async fn test_challenge_triggers_exactly_one_relogin() {
        let client = site_client();
        let manager = manager(&client, "s3cret", spec());

        manager.fetch(REPORTS, &RenderConfig::default()).await.unwrap();
        client.revoke_sessions();

        let result = manager.fetch(REPORTS, &RenderConfig::default()).await.unwrap();
        assert_eq!(result.final_url, REPORTS);
        assert_eq!(client.submits(), 2);

        let session = manager.session("app.example.com").await.unwrap();
        assert_eq!(session.generation, 2);
    }

    #[tokio::test]
    async fn test_persistent_challenge_is_reported() {
        let client = site_client();
        let manager = manager(&client, "s3cret", spec());

        manager.fetch(REPORTS, &RenderConfig::default()).await.unwrap();
        client.revoke_sessions();
        client.break_sessions();

        let err = manager.fetch(REPORTS, &RenderConfig::default()).await.unwrap_err();
        assert!(matches!(
            err,
            TaskError::Auth(AuthError::ChallengePersisted { .. })
        ));
        assert_eq!(client.submits(), 2);

        let session = manager.session("app.example.com").await.unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert!(session.cookies.is_empty());

        // The failure sticks instead of logging in on every fetch
        for _ in 0..2 {
            let again = manager.fetch(REPORTS, &RenderConfig::default()).await.unwrap_err();
            assert_eq!(again, err);
        }
        assert_eq!(client.submits(), 2);
    }

    #[tokio::test]
    async fn test_bounced_tentative_login_fails_session() {
        let client = site_client();
        let spec = LoginSpec {
            verify_url_change: false,
            ..spec()
        };
        let manager = manager(&client, "wrong", spec);

        let err = manager.fetch(REPORTS, &RenderConfig::default()).await.unwrap_err();
        assert!(matches!(
            err,
            TaskError::Auth(AuthError::CredentialRejected { .. })
        ));
        for _ in 0..2 {
            assert!(manager.fetch(REPORTS, &RenderConfig::default()).await.is_err());
        }

        let session = manager.session("app.example.com").await.unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.login_count, 1);
        assert_eq!(client.submits(), 1);
        assert_eq!(client.render_count(REPORTS), 1);
    }

    #[tokio::test]
    async fn test_tentative_session_revalidated_by_fetch() {
        let client = site_client();
        let spec = LoginSpec {
            verify_url_change: false,
            ..spec()
        };
        let manager = manager(&client, "s3cret", spec);

        let session = manager
            .ensure_session(
                "app.example.com",
                &Credentials::new("alice", "s3cret"),
                &manager.sites[0].spec,
                REPORTS,
            )
            .await
            .unwrap();
        assert!(session.needs_revalidation);

        manager.fetch(REPORTS, &RenderConfig::default()).await.unwrap();
        let session = manager.session("app.example.com").await.unwrap();
        assert!(!session.needs_revalidation);
        assert_eq!(client.submits(), 1);
    }

    #[tokio::test]
    async fn test_missing_login_form() {
        let client = ScriptedClient::new().page(LOGIN, &[]).page(REPORTS, &[]);
        let manager = manager(&client, "s3cret", spec());

        let err = manager.fetch(REPORTS, &RenderConfig::default()).await.unwrap_err();
        assert!(matches!(
            err,
            TaskError::Auth(AuthError::SelectorNotFound {
                field: LoginField::Password,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_login_page_network_error_is_retryable() {
        let client = site_client().fail_times(LOGIN, 1, FetchError::Network("reset".into()));
        let manager = manager(&client, "s3cret", spec());

        let err = manager.fetch(REPORTS, &RenderConfig::default()).await.unwrap_err();
        assert!(matches!(err, TaskError::Auth(AuthError::LoginFetch(_))));
        let session = manager.session("app.example.com").await.unwrap();
        assert_eq!(session.status, SessionStatus::Unauthenticated);

        assert!(manager.fetch(REPORTS, &RenderConfig::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_reset_clears_failed_session() {
        let client = site_client();
        let manager = manager(&client, "wrong", spec());

        assert!(manager.fetch(REPORTS, &RenderConfig::default()).await.is_err());
        manager.reset("app.example.com").await;
        assert!(manager.session("app.example.com").await.is_none());

        assert!(manager.fetch(REPORTS, &RenderConfig::default()).await.is_err());
        assert_eq!(client.submits(), 2);
    }

    #[tokio::test]
    async fn test_unmatched_urls_skip_sessions() {
        let client = site_client().page("https://public.example.org/", &[]);
        let manager = manager(&client, "s3cret", spec());

        manager
            .fetch("https://public.example.org/", &RenderConfig::default())
            .await
            .unwrap();
        assert_eq!(client.submits(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_share_one_login() {
        let client = site_client().delay(LOGIN, Duration::from_millis(20));
        let manager = Arc::new(manager(&client, "s3cret", spec()));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.fetch(REPORTS, &RenderConfig::default()).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(client.submits(), 1);
    }

    #[tokio::test]
    async fn test_persisted_session_is_reused() {
        let client = site_client();
        let storage: SharedStorage = Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));

        let first = manager(&client, "s3cret", spec()).with_storage(Arc::clone(&storage));
        first.fetch(REPORTS, &RenderConfig::default()).await.unwrap();

        let second = manager(&client, "s3cret", spec()).with_storage(Arc::clone(&storage));
        second.fetch(REPORTS, &RenderConfig::default()).await.unwrap();

        assert_eq!(client.submits(), 1);
    }

    #[tokio::test]
    async fn test_restored_session_relogs_when_bounced() {
        let client = site_client();
        let storage: SharedStorage = Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));

        let first = manager(&client, "s3cret", spec()).with_storage(Arc::clone(&storage));
        first.fetch(REPORTS, &RenderConfig::default()).await.unwrap();
        client.revoke_sessions();

        let second = manager(&client, "s3cret", spec()).with_storage(Arc::clone(&storage));
        let result = second.fetch(REPORTS, &RenderConfig::default()).await.unwrap();

        assert_eq!(result.final_url, REPORTS);
        assert_eq!(client.submits(), 2);
        let session = second.session("app.example.com").await.unwrap();
        assert_eq!(session.status, SessionStatus::Authenticated);
        assert_eq!(session.login_url.as_deref(), Some(LOGIN));
    }

    #[test]
    fn test_same_page_ignores_query_and_fragment() {
        assert!(same_page(
            "https://app.example.com/login?error=1",
            "https://www.app.example.com/login/"
        ));
        assert!(!same_page(
            "https://app.example.com/home",
            "https://app.example.com/login"
        ));
    }
}
