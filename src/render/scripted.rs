//! Scripted renderer for unit tests
//!
//! Serves a fixed site graph without touching the network, with per-URL
//! latency, failure injection, a scripted login form and cookie-protected
//! pages. It also tracks how many renders run at once.

use super::{FetchError, FetchResult, FormSubmission, RenderClient, RenderConfig};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

pub(crate) const LOGIN_FORM: &str = r#"<html><head><title>Sign in</title></head><body>
<form method="post" action="/login">
  <input type="hidden" name="csrf" value="t0k">
  <input id="username" name="username">
  <input id="password" type="password" name="password">
  <button type="submit">Sign in</button>
</form></body></html>"#;

#[derive(Default, Clone)]
struct Page {
    links: Vec<(String, String)>,
    body: Option<String>,
    status_code: Option<u16>,
    delay: Duration,
    /// Errors returned by the next renders, in order
    failures: VecDeque<FetchError>,
    always_fail: Option<FetchError>,
}

struct LoginScript {
    login_url: String,
    landing_url: String,
    password: String,
    cookie: String,
    issued: u32,
    valid_tokens: HashSet<String>,
}

#[derive(Default)]
struct State {
    pages: HashMap<String, Page>,
    protected: HashSet<String>,
    login: Option<LoginScript>,
    rendered: Vec<String>,
    submits: usize,
}

/// In-memory site graph implementing [`RenderClient`]
#[derive(Clone, Default)]
pub(crate) struct ScriptedClient {
    state: Arc<Mutex<State>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

struct FlightGuard(Arc<AtomicUsize>);

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn with_page(self, url: &str, f: impl FnOnce(&mut Page)) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            f(state.pages.entry(url.to_string()).or_default());
        }
        self
    }

    /// Page linking to `links` (anchor text = the URL's last path segment)
    pub(crate) fn page(self, url: &str, links: &[&str]) -> Self {
        let links = links
            .iter()
            .map(|l| {
                let text = l.rsplit('/').next().unwrap_or_default().to_string();
                (l.to_string(), text)
            })
            .collect();
        self.with_page(url, |p| p.links = links)
    }

    /// Page linking to `(url, anchor text)` pairs
    pub(crate) fn page_with_text(self, url: &str, links: &[(&str, &str)]) -> Self {
        let links = links
            .iter()
            .map(|(l, t)| (l.to_string(), t.to_string()))
            .collect();
        self.with_page(url, |p| p.links = links)
    }

    pub(crate) fn html(self, url: &str, body: &str) -> Self {
        let body = body.to_string();
        self.with_page(url, |p| p.body = Some(body))
    }

    pub(crate) fn status(self, url: &str, code: u16) -> Self {
        self.with_page(url, |p| p.status_code = Some(code))
    }

    pub(crate) fn delay(self, url: &str, delay: Duration) -> Self {
        self.with_page(url, |p| p.delay = delay)
    }

    /// Every page without its own delay gets this one
    pub(crate) fn default_delay(self, delay: Duration) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for page in state.pages.values_mut() {
                if page.delay.is_zero() {
                    page.delay = delay;
                }
            }
        }
        self
    }

    pub(crate) fn fail(self, url: &str, error: FetchError) -> Self {
        self.with_page(url, |p| p.always_fail = Some(error))
    }

    pub(crate) fn fail_times(self, url: &str, times: usize, error: FetchError) -> Self {
        self.with_page(url, |p| {
            p.failures.extend(std::iter::repeat(error).take(times))
        })
    }

    /// Serves [`LOGIN_FORM`] at `login_url`; a submission with `password`
    /// lands on `landing_url` with a fresh `cookie` token
    pub(crate) fn login(self, login_url: &str, landing_url: &str, password: &str, cookie: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.login = Some(LoginScript {
                login_url: login_url.to_string(),
                landing_url: landing_url.to_string(),
                password: password.to_string(),
                cookie: cookie.to_string(),
                issued: 0,
                valid_tokens: HashSet::new(),
            });
        }
        self.html(login_url, LOGIN_FORM)
    }

    /// Page that bounces to the login page without a valid session cookie
    pub(crate) fn protected(self, url: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.protected.insert(url.to_string());
        }
        self.with_page(url, |_| {})
    }

    /// Invalidates every issued session token server-side
    pub(crate) fn revoke_sessions(&self) {
        if let Some(login) = self.state.lock().unwrap().login.as_mut() {
            login.valid_tokens.clear();
        }
    }

    /// Makes every later successful login issue a token the server rejects
    pub(crate) fn break_sessions(&self) {
        if let Some(login) = self.state.lock().unwrap().login.as_mut() {
            login.cookie = format!("{}-broken", login.cookie);
        }
    }

    pub(crate) fn rendered(&self) -> Vec<String> {
        self.state.lock().unwrap().rendered.clone()
    }

    pub(crate) fn render_count(&self, url: &str) -> usize {
        self.rendered().iter().filter(|u| u.as_str() == url).count()
    }

    pub(crate) fn submits(&self) -> usize {
        self.state.lock().unwrap().submits
    }

    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn build(url: &str, page: &Page, status_code: u16) -> FetchResult {
        let body = page.body.clone().unwrap_or_else(|| {
            let anchors: String = page
                .links
                .iter()
                .map(|(href, text)| format!("<a href=\"{}\">{}</a>", href, text))
                .collect();
            format!(
                "<html><head><title>{}</title></head><body>{}</body></html>",
                url, anchors
            )
        });
        match Url::parse(url) {
            Ok(parsed) => FetchResult::from_html(url, &parsed, status_code, body, 1),
            Err(_) => FetchResult::from_html(
                url,
                &Url::parse("http://invalid.test/").unwrap(),
                status_code,
                body,
                1,
            ),
        }
    }
}

#[async_trait]
impl RenderClient for ScriptedClient {
    async fn render(&self, url: &str, config: &RenderConfig) -> Result<FetchResult, FetchError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        let _guard = FlightGuard(Arc::clone(&self.in_flight));

        let (page, delay) = {
            let mut state = self.state.lock().unwrap();
            state.rendered.push(url.to_string());
            let page = state.pages.get_mut(url).map(|p| {
                let failure = p.failures.pop_front().or_else(|| p.always_fail.clone());
                (p.clone(), failure)
            });
            let delay = page.as_ref().map(|(p, _)| p.delay).unwrap_or_default();
            (page, delay)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let Some((page, failure)) = page else {
            return Ok(Self::build(url, &Page::default(), 404));
        };
        if let Some(error) = failure {
            return Err(error);
        }

        let state = self.state.lock().unwrap();
        if state.protected.contains(url) {
            if let Some(login) = &state.login {
                let authorized = config
                    .cookies
                    .get(&login.cookie)
                    .map(|token| login.valid_tokens.contains(token))
                    .unwrap_or(false);
                if !authorized {
                    let login_page = state.pages.get(&login.login_url).cloned().unwrap_or_default();
                    let mut bounced = Self::build(&login.login_url, &login_page, 200);
                    bounced.url = url.to_string();
                    bounced.cookies = config.cookies.clone();
                    return Ok(bounced);
                }
            }
        }

        let mut result = Self::build(url, &page, page.status_code.unwrap_or(200));
        result.cookies = config.cookies.clone();
        Ok(result)
    }

    async fn submit_form(
        &self,
        form: &FormSubmission,
        config: &RenderConfig,
    ) -> Result<FetchResult, FetchError> {
        let mut state = self.state.lock().unwrap();
        state.submits += 1;

        let Some(login) = state.login.as_mut() else {
            return Err(FetchError::Network("no login form scripted".to_string()));
        };

        let password_ok = form
            .fields
            .iter()
            .any(|(name, value)| name == "password" && *value == login.password);
        let csrf_ok = form
            .fields
            .iter()
            .any(|(name, value)| name == "csrf" && value == "t0k");

        if password_ok && csrf_ok {
            login.issued += 1;
            let token = format!("token-{}", login.issued);
            login.valid_tokens.insert(token.clone());
            let cookie = login.cookie.clone();
            let landing = login.landing_url.clone();
            if cookie.ends_with("-broken") {
                login.valid_tokens.remove(&token);
            }
            let page = state.pages.get(&landing).cloned().unwrap_or_default();
            let mut result = Self::build(&landing, &page, 200);
            result.url = form.action.clone();
            result.cookies = config.cookies.clone();
            result.cookies.insert(cookie, token);
            Ok(result)
        } else {
            let login_url = login.login_url.clone();
            let page = state.pages.get(&login_url).cloned().unwrap_or_default();
            let mut result = Self::build(&login_url, &page, 200);
            result.url = form.action.clone();
            result.cookies = config.cookies.clone();
            Ok(result)
        }
    }
}
