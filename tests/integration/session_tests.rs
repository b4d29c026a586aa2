//! Integration tests for authenticated fetching against a mock login flow

use ripple_crawl::batch::{BatchController, MemoryPolicy, TaskError};
use ripple_crawl::config::{parse_config, Config};
use ripple_crawl::crawler::CrawlTask;
use ripple_crawl::render::{HttpRenderClient, RenderClient, RenderConfig};
use ripple_crawl::session::{AuthError, SessionManager};
use ripple_crawl::state::SessionStatus;
use ripple_crawl::storage::{open_storage, SharedStorage};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SITE: &str = "127.0.0.1";

const LOGIN_FORM: &str = r#"<html><head><title>Sign in</title></head><body>
<form action="/login" method="post">
  <input type="hidden" name="csrf" value="tok123">
  <input id="username" name="username" type="text">
  <input id="password" name="password" type="password">
  <button type="submit">Sign in</button>
</form>
</body></html>"#;

fn auth_config(base_url: &str, password: &str) -> Config {
    let toml = format!(
        r#"
[batch]
max-concurrent = 3
retry-budget = 0

[[auth]]
site = "{site}"
username = "alice"
password = "{password}"
login-url = "{base}/login"
settle-delay-ms = 10
"#,
        site = SITE,
        password = password,
        base = base_url,
    );
    parse_config(&toml).expect("Failed to parse auth config")
}

fn client(config: &Config) -> Arc<dyn RenderClient> {
    Arc::new(HttpRenderClient::new(config.render.clone()).expect("Failed to build HTTP client"))
}

/// Mounts a site whose dashboard needs the `sid=abc` cookie
///
/// `logins` is the number of successful POSTs the test expects.
async fn mount_site(server: &MockServer, logins: u64) {
    let base_url = server.uri();

    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_FORM))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_string_contains("password=secret"))
        .and(body_string_contains("csrf=tok123"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", format!("{}/dashboard", base_url).as_str())
                .insert_header("set-cookie", "sid=abc; Path=/; HttpOnly"),
        )
        .expect(logins)
        .mount(server)
        .await;

    // Wrong credentials land back on the form
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_FORM))
        .mount(server)
        .await;

    for route in ["/dashboard", "/reports", "/settings"] {
        Mock::given(method("GET"))
            .and(path(route))
            .and(header("cookie", "sid=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "<html><head><title>Welcome {}</title></head><body>ok</body></html>",
                route
            )))
            .mount(server)
            .await;
    }

    for route in ["/dashboard", "/reports", "/settings"] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", format!("{}/login", base_url).as_str()),
            )
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn test_login_once_and_reuse_session() {
    let mock_server = MockServer::start().await;
    mount_site(&mock_server, 1).await;
    let base_url = mock_server.uri();

    let config = auth_config(&base_url, "secret");
    let manager = SessionManager::from_config(client(&config), &config.auth, None)
        .expect("Failed to build session manager");

    for route in ["/dashboard", "/reports"] {
        let result = manager
            .fetch(&format!("{}{}", base_url, route), &RenderConfig::default())
            .await
            .expect("Authenticated fetch failed");
        assert!(result.is_success());
        assert_eq!(result.title.as_deref(), Some(format!("Welcome {}", route).as_str()));
    }

    let session = manager.session(SITE).await.expect("No session recorded");
    assert_eq!(session.status, SessionStatus::Authenticated);
    assert_eq!(session.cookies.get("sid").map(String::as_str), Some("abc"));
    assert_eq!(session.login_count, 1);
}

#[tokio::test]
async fn test_rejected_credentials_fail_session() {
    let mock_server = MockServer::start().await;
    mount_site(&mock_server, 0).await;
    let base_url = mock_server.uri();

    let config = auth_config(&base_url, "wrong");
    let manager = SessionManager::from_config(client(&config), &config.auth, None).unwrap();
    let target = format!("{}/dashboard", base_url);

    let err = manager
        .fetch(&target, &RenderConfig::default())
        .await
        .expect_err("Login should have been rejected");
    assert!(matches!(
        err,
        TaskError::Auth(AuthError::CredentialRejected { .. })
    ));

    let session = manager.session(SITE).await.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);

    // A failed session is not retried
    let again = manager.fetch(&target, &RenderConfig::default()).await;
    assert_eq!(again.unwrap_err(), err);
    assert_eq!(manager.session(SITE).await.unwrap().login_count, 1);
}

#[tokio::test]
async fn test_concurrent_batch_shares_one_login() {
    let mock_server = MockServer::start().await;
    mount_site(&mock_server, 1).await;
    let base_url = mock_server.uri();

    let config = auth_config(&base_url, "secret");
    let http = client(&config);
    let manager = Arc::new(SessionManager::from_config(Arc::clone(&http), &config.auth, None).unwrap());
    let controller = BatchController::new(http, &config.batch)
        .with_sessions(manager)
        .with_memory_policy(MemoryPolicy::disabled());

    let tasks: Vec<CrawlTask> = ["/dashboard", "/reports", "/settings"]
        .iter()
        .enumerate()
        .map(|(i, route)| CrawlTask::new(i as u64, format!("{}{}", base_url, route), 0, None))
        .collect();

    let report = controller
        .run(tasks, &RenderConfig::default(), &CancellationToken::new())
        .await;

    assert_eq!(report.total(), 3);
    assert_eq!(report.successful(), 3);
}

#[tokio::test]
async fn test_persisted_session_survives_restart() {
    let mock_server = MockServer::start().await;
    mount_site(&mock_server, 1).await;
    let base_url = mock_server.uri();

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("sessions.db");
    let config = auth_config(&base_url, "secret");
    let target = format!("{}/dashboard", base_url);

    {
        let storage: SharedStorage = open_storage(&db_path).expect("Failed to open storage");
        let manager = SessionManager::from_config(client(&config), &config.auth, Some(storage)).unwrap();
        manager
            .fetch(&target, &RenderConfig::default())
            .await
            .expect("First fetch failed");
    }

    let storage = open_storage(&db_path).expect("Failed to reopen storage");
    let manager = SessionManager::from_config(client(&config), &config.auth, Some(storage)).unwrap();
    let result = manager
        .fetch(&target, &RenderConfig::default())
        .await
        .expect("Fetch with restored session failed");

    assert!(result.is_success());
    let session = manager.session(SITE).await.unwrap();
    assert_eq!(session.status, SessionStatus::Authenticated);
    assert_eq!(session.login_count, 0);
}

#[tokio::test]
async fn test_deleted_cookie_is_not_sent_back() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/logout"))
        .and(header("cookie", "sid=abc"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", format!("{}/goodbye", base_url).as_str())
                .insert_header("set-cookie", "sid=; Max-Age=0"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    // Mounted first, so it wins whenever any cookie is sent
    Mock::given(method("GET"))
        .and(path("/goodbye"))
        .and(header_exists("cookie"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/goodbye"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><head><title>Bye</title></head></html>"),
        )
        .mount(&mock_server)
        .await;

    let config = auth_config(&base_url, "secret");
    let mut cookies = BTreeMap::new();
    cookies.insert("sid".to_string(), "abc".to_string());
    let result = client(&config)
        .render(
            &format!("{}/logout", base_url),
            &RenderConfig {
                cookies,
                ..RenderConfig::default()
            },
        )
        .await
        .expect("Fetch failed");

    assert!(result.is_success());
    assert_eq!(result.title.as_deref(), Some("Bye"));
    assert!(result.cookies.is_empty());
}
