//! Integration tests for crawling and batch fetching
//!
//! These tests use wiremock to create mock HTTP servers and run the HTTP
//! renderer, batch controller, scheduler and content cache end-to-end.

use ripple_crawl::batch::{BatchController, MemoryPolicy, TaskError};
use ripple_crawl::cache::{CacheParams, ContentCache, ListFilter};
use ripple_crawl::config::{parse_config, Config};
use ripple_crawl::crawler::{CrawlScheduler, CrawlTask};
use ripple_crawl::render::{FetchError, HttpRenderClient, RenderClient, RenderConfig};
use ripple_crawl::state::FetchStatus;
use ripple_crawl::storage::open_storage;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration for a crawl of the mock server
fn create_test_config(extra: &str) -> Config {
    let toml = format!(
        r#"
[crawler]
allowed-domains = ["127.0.0.1"]
max-depth = 3
max-pages = 20

[batch]
max-concurrent = 2
retry-budget = 0

[render]
timeout-ms = 5000

{}
"#,
        extra
    );
    parse_config(&toml).expect("Failed to parse test config")
}

fn controller(config: &Config) -> BatchController {
    let client: Arc<dyn RenderClient> = Arc::new(
        HttpRenderClient::new(config.render.clone()).expect("Failed to build HTTP client"),
    );
    BatchController::new(client, &config.batch).with_memory_policy(MemoryPolicy::disabled())
}

fn html(title: &str, links: &[String]) -> String {
    let anchors: String = links
        .iter()
        .map(|href| format!("<a href=\"{}\">{}</a>\n", href, href))
        .collect();
    format!(
        "<html><head><title>{}</title></head><body>{}</body></html>",
        title, anchors
    )
}

async fn mount_page(server: &MockServer, route: &str, title: &str, links: &[String]) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(html(title, links))
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_full_crawl_single_domain() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_page(
        &mock_server,
        "/",
        "Home",
        &[
            format!("{}/page1", base_url),
            format!("{}/page2", base_url),
            "https://external.example.org/x".to_string(),
        ],
    )
    .await;
    mount_page(
        &mock_server,
        "/page1",
        "Page 1",
        &[format!("{}/deep", base_url), format!("{}/", base_url)],
    )
    .await;
    mount_page(&mock_server, "/page2", "Page 2", &[]).await;
    mount_page(
        &mock_server,
        "/deep",
        "Deep",
        &[format!("{}/deeper", base_url)],
    )
    .await;

    // Depth 3 with max-depth 2: must never be fetched
    Mock::given(method("GET"))
        .and(path("/deeper"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let mut config = create_test_config("");
    config.crawler.max_depth = 2;

    let cache = Arc::new(ContentCache::in_memory());
    let scheduler = CrawlScheduler::new(controller(&config), &config.crawler)
        .expect("Failed to create scheduler")
        .with_cache(Arc::clone(&cache));

    let report = scheduler
        .run(&format!("{}/", base_url), &CancellationToken::new())
        .await
        .expect("Crawl failed");

    assert_eq!(report.pages.len(), 4);
    assert_eq!(report.summary.pages_succeeded, 4);
    assert_eq!(report.summary.pruned.off_domain, 1);
    assert_eq!(report.summary.pruned.depth, 1);
    assert_eq!(report.summary.pruned.duplicate, 1);
    assert_eq!(report.summary.max_depth_reached, 2);

    let mut titles: Vec<String> = report
        .pages
        .iter()
        .filter_map(|p| p.result.title.clone())
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["Deep", "Home", "Page 1", "Page 2"]);

    for page in &report.pages {
        let id = page.cache_id.as_ref().expect("Page was not cached");
        let entry = cache.get(id).expect("Cached entry missing");
        assert_eq!(entry.source_url, page.task.url);
    }
}

#[tokio::test]
async fn test_http_errors_do_not_abort_crawl() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_page(
        &mock_server,
        "/",
        "Home",
        &[
            format!("{}/missing", base_url),
            format!("{}/boom", base_url),
            format!("{}/ok", base_url),
        ],
    )
    .await;
    mount_page(&mock_server, "/ok", "OK", &[]).await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/boom"))
        .respond_with(ResponseTemplate::new(500).set_body_string("error"))
        .mount(&mock_server)
        .await;

    let config = create_test_config("");
    let scheduler = CrawlScheduler::new(controller(&config), &config.crawler).unwrap();
    let report = scheduler
        .run(&base_url, &CancellationToken::new())
        .await
        .expect("Crawl failed");

    assert_eq!(report.summary.pages_visited, 4);
    assert_eq!(report.summary.pages_succeeded, 2);
    assert_eq!(report.summary.errors.len(), 2);
    assert!(report
        .summary
        .errors
        .iter()
        .all(|e| e.status == FetchStatus::HttpError));
    assert!(report
        .summary
        .errors
        .iter()
        .any(|e| e.url.ends_with("/missing") && e.message == "HTTP 404"));
}

#[tokio::test]
async fn test_redirect_target_is_not_refetched() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_page(&mock_server, "/", "Home", &[format!("{}/old", base_url)]).await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(
            ResponseTemplate::new(301).insert_header("location", format!("{}/new", base_url).as_str()),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(html("New", &[format!("{}/other", base_url)])),
        )
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_page(&mock_server, "/other", "Other", &[format!("{}/new", base_url)]).await;

    let config = create_test_config("");
    let scheduler = CrawlScheduler::new(controller(&config), &config.crawler).unwrap();
    let report = scheduler
        .run(&base_url, &CancellationToken::new())
        .await
        .expect("Crawl failed");

    let old = report
        .pages
        .iter()
        .find(|p| p.task.url.ends_with("/old"))
        .expect("Redirecting page missing");
    assert!(old.result.final_url.ends_with("/new"));
    assert_eq!(report.pages.len(), 3);
    assert_eq!(report.summary.pruned.duplicate, 1);
}

#[tokio::test]
async fn test_slow_page_times_out() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_page(&mock_server, "/fast", "Fast", &[]).await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(html("Slow", &[]))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&mock_server)
        .await;

    let mut config = create_test_config("");
    config.render.timeout_ms = 200;

    let tasks = vec![
        CrawlTask::new(0, format!("{}/fast", base_url), 0, None),
        CrawlTask::new(1, format!("{}/slow", base_url), 0, None),
    ];
    let report = controller(&config)
        .run(tasks, &RenderConfig::default(), &CancellationToken::new())
        .await;

    assert_eq!(report.total(), 2);
    assert!(report.outcome(0).unwrap().is_success());
    let slow = report.outcome(1).unwrap();
    assert!(matches!(
        slow.result,
        Err(TaskError::Fetch(FetchError::Timeout(200)))
    ));
    assert_eq!(slow.status(), FetchStatus::Timeout);
}

#[tokio::test]
async fn test_batch_results_survive_restart() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    for route in ["/a", "/b", "/c"] {
        mount_page(&mock_server, route, route, &[]).await;
    }

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("cache.db");
    let config = create_test_config(&format!(
        "[cache]\ndatabase-path = \"{}\"\n",
        db_path.display()
    ));

    let tasks: Vec<CrawlTask> = ["/a", "/b", "/c"]
        .iter()
        .enumerate()
        .map(|(i, route)| CrawlTask::new(i as u64, format!("{}{}", base_url, route), 0, None))
        .collect();
    let report = controller(&config)
        .run(tasks, &RenderConfig::default(), &CancellationToken::new())
        .await;
    assert_eq!(report.successful(), 3);

    let mut ids = Vec::new();
    {
        let storage = open_storage(&db_path).expect("Failed to open storage");
        let cache = ContentCache::new(&config.cache, Some(storage));
        let mut outcomes: Vec<_> = report.outcomes.iter().collect();
        outcomes.sort_by_key(|o| o.task.id);
        for outcome in outcomes {
            let result = outcome.result.clone().expect("Fetch failed");
            let params = CacheParams::new(outcome.task.url.clone(), RenderConfig::default());
            ids.push(cache.put(&params, result).expect("Failed to cache"));
        }
    }

    // A new process sees the same entries
    let storage = open_storage(&db_path).expect("Failed to reopen storage");
    let cache = ContentCache::new(&config.cache, Some(storage));

    for (id, route) in ids.iter().zip(["/a", "/b", "/c"]) {
        let entry = cache.get(id).expect("Entry lost across restart");
        assert_eq!(entry.result.title.as_deref(), Some(route));
    }

    let listed = cache.list(&ListFilter::default()).expect("Failed to list");
    assert_eq!(listed.len(), 3);
    assert!(listed
        .windows(2)
        .all(|w| w[0].created_at >= w[1].created_at));

    let again = cache
        .put(
            &CacheParams::new(format!("{}/a", base_url), RenderConfig::default()),
            cache.get(&ids[0]).unwrap().result,
        )
        .unwrap();
    assert_eq!(again, ids[0]);

    assert!(cache.get("000000000000").is_err());
}
