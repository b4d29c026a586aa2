//! reqwest-backed renderer
//!
//! Serves static pages: it follows redirects by hand so that cookies set
//! along a redirect chain (typical after a login POST) are carried to the
//! next hop, and it re-fetches a page until a wait selector shows up.
//! Cookies live in a per-request `CookieStore`, so Domain, Path, Max-Age
//! and Expires are honoured along the chain.
//! Script execution, scrolling, screenshots and PDFs need a browser and are
//! not available here.

use super::parser::contains_selector;
use super::{FetchError, FetchResult, FormMethod, FormSubmission, RenderClient, RenderConfig, WaitCondition};
use crate::config::RenderSettings;
use async_trait::async_trait;
use cookie_store::CookieStore;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE, LOCATION, REFERER, SET_COOKIE};
use reqwest::{redirect::Policy, Client, Method, StatusCode};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use url::Url;

/// One hop of a request chain
struct PendingRequest {
    method: Method,
    url: Url,
    form: Option<Vec<(String, String)>>,
    referer: Option<String>,
}

/// A response after the redirect chain settled
struct Landed {
    final_url: Url,
    status: StatusCode,
    body: String,
    cookies: BTreeMap<String, String>,
}

/// Renders pages with plain HTTP requests
#[derive(Debug, Clone)]
pub struct HttpRenderClient {
    client: Client,
    settings: RenderSettings,
}

impl HttpRenderClient {
    /// Builds the renderer and its HTTP client
    ///
    /// # Arguments
    ///
    /// * `settings` - The `[render]` configuration section
    ///
    /// # Returns
    ///
    /// * `Ok(HttpRenderClient)` - Ready to render
    /// * `Err(reqwest::Error)` - The HTTP client could not be built
    pub fn new(settings: RenderSettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .connect_timeout(Duration::from_millis(settings.connect_timeout_ms))
            .redirect(Policy::none()) // Handle redirects manually
            .https_only(settings.https_only)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self { client, settings })
    }

    fn timeout_for(&self, config: &RenderConfig) -> u64 {
        config.timeout_ms.unwrap_or(self.settings.timeout_ms)
    }

    /// Sends a request and follows redirects up to `max-redirects` hops
    ///
    /// 301, 302 and 303 turn the next hop into a GET without a body; 307 and
    /// 308 repeat the original request. If the hop limit is exceeded the
    /// last redirect response is returned as is.
    async fn send_chain(
        &self,
        mut request: PendingRequest,
        config: &RenderConfig,
    ) -> Result<Landed, FetchError> {
        let timeout_ms = self.timeout_for(config);
        let mut jar = seed_jar(&config.cookies, &request.url);
        let mut hops = 0;

        loop {
            let mut builder = self
                .client
                .request(request.method.clone(), request.url.clone())
                .headers(build_headers(&config.headers));
            if let Some(cookies) = cookie_header(&jar, &request.url) {
                builder = builder.header(COOKIE, cookies);
            }
            if let Some(referer) = &request.referer {
                builder = builder.header(REFERER, referer.as_str());
            }
            if let Some(form) = &request.form {
                builder = builder.form(form);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| classify_error(e, timeout_ms))?;
            let status = response.status();

            for value in response.headers().get_all(SET_COOKIE) {
                match value.to_str() {
                    Ok(header) => store_set_cookie(&mut jar, header, &request.url),
                    Err(_) => tracing::trace!("Ignoring non-ASCII Set-Cookie from {}", request.url),
                }
            }

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|loc| request.url.join(loc).ok());

            match location {
                Some(next) if status.is_redirection() && hops < self.settings.max_redirects => {
                    tracing::trace!("Redirect {} -> {} ({})", request.url, next, status);
                    hops += 1;
                    let keep_method = matches!(
                        status,
                        StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT
                    );
                    request = PendingRequest {
                        method: if keep_method { request.method } else { Method::GET },
                        form: if keep_method { request.form } else { None },
                        referer: Some(request.url.to_string()),
                        url: next,
                    };
                }
                _ => {
                    let final_url = response.url().clone();
                    let body = response
                        .text()
                        .await
                        .map_err(|e| classify_error(e, timeout_ms))?;
                    let cookies = jar_contents(&jar, &final_url);
                    return Ok(Landed {
                        final_url,
                        status,
                        body,
                        cookies,
                    });
                }
            }
        }
    }

    async fn render_once(
        &self,
        url: &Url,
        requested: &str,
        config: &RenderConfig,
    ) -> Result<FetchResult, FetchError> {
        let started = Instant::now();
        let landed = self
            .send_chain(
                PendingRequest {
                    method: Method::GET,
                    url: url.clone(),
                    form: None,
                    referer: None,
                },
                config,
            )
            .await?;
        Ok(into_result(requested, landed, started))
    }

    async fn render_inner(&self, url: &str, config: &RenderConfig) -> Result<FetchResult, FetchError> {
        if config.run_script.is_some() {
            return Err(FetchError::Script(
                "script execution needs a browser renderer".to_string(),
            ));
        }
        if config.screenshot || config.pdf || config.scroll.is_some() {
            tracing::debug!("Screenshot, PDF and scrolling are unavailable for {}", url);
        }

        let parsed = Url::parse(url).map_err(|e| FetchError::Network(format!("invalid URL: {}", e)))?;

        let wait_for = match &config.wait_for {
            Some(condition) => Some(condition.clone()),
            None => self.settings.wait_for.clone().map(WaitCondition::Selector),
        };

        match wait_for {
            None => self.render_once(&parsed, url, config).await,
            Some(WaitCondition::DelayMs(delay)) => {
                let result = self.render_once(&parsed, url, config).await?;
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(result)
            }
            Some(WaitCondition::Selector(selector)) => {
                let poll = Duration::from_millis(self.settings.wait_poll_ms.max(1));
                loop {
                    let result = self.render_once(&parsed, url, config).await?;
                    if !result.is_success() || contains_selector(&result.html, &selector) {
                        return Ok(result);
                    }
                    tracing::trace!("Waiting for '{}' on {}", selector, url);
                    tokio::time::sleep(poll).await;
                }
            }
        }
    }
}

#[async_trait]
impl RenderClient for HttpRenderClient {
    async fn render(&self, url: &str, config: &RenderConfig) -> Result<FetchResult, FetchError> {
        let timeout_ms = self.timeout_for(config);
        tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.render_inner(url, config),
        )
        .await
        .map_err(|_| FetchError::Timeout(timeout_ms))?
    }

    async fn submit_form(
        &self,
        form: &FormSubmission,
        config: &RenderConfig,
    ) -> Result<FetchResult, FetchError> {
        let timeout_ms = self.timeout_for(config);
        let action = Url::parse(&form.action)
            .map_err(|e| FetchError::Network(format!("invalid form action: {}", e)))?;

        let mut url = action.clone();
        let (method, body) = match form.method {
            FormMethod::Post => (Method::POST, Some(form.fields.clone())),
            FormMethod::Get => {
                url.query_pairs_mut().clear().extend_pairs(form.fields.iter());
                (Method::GET, None)
            }
        };

        let started = Instant::now();
        let request = PendingRequest {
            method,
            url,
            form: body,
            referer: Some(form.referer.clone()),
        };

        let landed = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.send_chain(request, config),
        )
        .await
        .map_err(|_| FetchError::Timeout(timeout_ms))??;

        Ok(into_result(action.as_str(), landed, started))
    }
}

fn into_result(requested: &str, landed: Landed, started: Instant) -> FetchResult {
    let mut result = FetchResult::from_html(
        requested,
        &landed.final_url,
        landed.status.as_u16(),
        landed.body,
        started.elapsed().as_millis() as u64,
    );
    result.cookies = landed.cookies;
    result
}

fn build_headers(headers: &BTreeMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => tracing::warn!("Skipping invalid header '{}'", name),
        }
    }
    map
}

/// Builds a jar holding `cookies` as host-only cookies of `url`
fn seed_jar(cookies: &BTreeMap<String, String>, url: &Url) -> CookieStore {
    let mut jar = CookieStore::default();
    for (name, value) in cookies {
        store_set_cookie(&mut jar, &format!("{}={}; Path=/", name, value), url);
    }
    jar
}

/// Applies one `Set-Cookie` header received from `url`
///
/// An expired cookie removes the stored one of the same name, domain and path.
fn store_set_cookie(jar: &mut CookieStore, header: &str, url: &Url) {
    if let Err(e) = jar.parse(header, url) {
        tracing::trace!("Cookie from {} not stored: {}", url, e);
    }
}

/// `Cookie` header value for a request to `url`, if any cookie applies
fn cookie_header(jar: &CookieStore, url: &Url) -> Option<String> {
    let pairs: Vec<String> = jar
        .get_request_values(url)
        .map(|(name, value)| format!("{}={}", name, value))
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

/// Name/value view of the unexpired cookies that apply to `url`
fn jar_contents(jar: &CookieStore, url: &Url) -> BTreeMap<String, String> {
    jar.matches(url)
        .into_iter()
        .map(|cookie| (cookie.name().to_string(), cookie.value().to_string()))
        .collect()
}

/// Maps a reqwest failure onto the render error taxonomy
fn classify_error(e: reqwest::Error, timeout_ms: u64) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(timeout_ms)
    } else if e.is_connect() {
        FetchError::Network(format!("connection failed: {}", e))
    } else {
        FetchError::Network(e.to_string())
    }
}
