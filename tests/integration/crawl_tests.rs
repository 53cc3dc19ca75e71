//! Integration tests for the crawler
//!
//! These tests use wiremock to stand in for the GitHub REST API and drive
//! `GitHubFetcher` through the crawl engine on a manual clock, so quota
//! waits complete instantly.

use chrono::{DateTime, TimeZone, Utc};
use gh_census::config::{
    ApiConfig, BackoffConfig, Config, CrawlConfig, EstimateConfig, UserAgentConfig,
};
use gh_census::crawler::{Clock, CrawlEngine, ManualClock, PageFetcher};
use gh_census::{CensusError, CrawlRange, Cursor, EntityKind, GitHubFetcher};
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
}

/// Creates a test configuration pointing at the mock server
fn create_test_config(base_url: &str) -> Config {
    Config {
        api: ApiConfig {
            base_url: base_url.to_string(),
            timeout_secs: 5,
        },
        user_agent: UserAgentConfig {
            crawler_name: "TestBot".to_string(),
            crawler_version: "1.0.0".to_string(),
            contact_url: "https://example.com/contact".to_string(),
            contact_email: "test@example.com".to_string(),
        },
        crawl: CrawlConfig::default(),
        backoff: BackoffConfig::default(),
        estimate: EstimateConfig::default(),
    }
}

fn create_engine(server: &MockServer, clock: Arc<ManualClock>) -> CrawlEngine<GitHubFetcher> {
    let config = create_test_config(&server.uri());
    let fetcher = GitHubFetcher::from_config(&config.api, &config.user_agent)
        .expect("Failed to build fetcher");
    CrawlEngine::with_clock(fetcher, &config, clock).with_preflight_quota(false)
}

fn listing(ids: &[u64]) -> ResponseTemplate {
    let body: Vec<Value> = ids
        .iter()
        .map(|id| json!({"id": id, "login": format!("user{}", id)}))
        .collect();
    ResponseTemplate::new(200)
        .set_body_json(body)
        .insert_header("x-ratelimit-limit", "5000")
        .insert_header("x-ratelimit-remaining", "4999")
        .insert_header("x-ratelimit-reset", "1792152000")
}

fn rate_limit_body(remaining: u32, reset: i64) -> Value {
    json!({
        "resources": {
            "core": {"limit": 5000, "used": 5000 - remaining, "remaining": remaining, "reset": reset}
        },
        "rate": {"limit": 5000, "remaining": remaining, "reset": reset}
    })
}

async fn mount_page(server: &MockServer, route: &str, since: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .and(query_param("since", since))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_full_crawl_until_empty_page() {
    let server = MockServer::start().await;
    mount_page(&server, "/users", "0", listing(&[1, 2, 4])).await;
    mount_page(&server, "/users", "4", listing(&[7])).await;
    mount_page(&server, "/users", "7", listing(&[])).await;

    let clock = Arc::new(ManualClock::new(start()));
    let engine = create_engine(&server, clock);

    let outcome = engine
        .crawl_all(EntityKind::Users, CrawlRange::unbounded())
        .await
        .expect("Crawl should succeed");

    let ids: Vec<u64> = outcome.records.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 4, 7]);
    assert_eq!(outcome.last_cursor, Cursor(7));
    assert_eq!(outcome.pages_fetched, 3);
    assert_eq!(outcome.records[3].attributes["login"], "user7");
}

#[tokio::test]
async fn test_crawl_stops_at_range_end() {
    let server = MockServer::start().await;
    mount_page(&server, "/organizations", "0", listing(&[10, 30, 50])).await;
    mount_page(&server, "/organizations", "50", listing(&[70, 95, 110, 120])).await;
    mount_page(&server, "/organizations", "120", listing(&[130])).await;

    let clock = Arc::new(ManualClock::new(start()));
    let engine = create_engine(&server, clock);

    let outcome = engine
        .crawl_all(EntityKind::Organizations, CrawlRange::bounded(0, 100))
        .await
        .expect("Crawl should succeed");

    assert_eq!(outcome.records.len(), 7);
    assert_eq!(outcome.last_cursor, Cursor(120));

    let requests = server.received_requests().await.expect("Recording enabled");
    assert_eq!(requests.len(), 2);
}

#[tokio::test]
async fn test_page_size_sent_except_for_repositories() {
    let server = MockServer::start().await;
    mount_page(&server, "/users", "0", listing(&[])).await;
    mount_page(&server, "/repositories", "0", listing(&[])).await;

    let clock = Arc::new(ManualClock::new(start()));
    let engine = create_engine(&server, clock);

    engine
        .crawl_all(EntityKind::Users, CrawlRange::unbounded())
        .await
        .unwrap();
    engine
        .crawl_all(EntityKind::Repositories, CrawlRange::unbounded())
        .await
        .unwrap();

    let requests = server.received_requests().await.expect("Recording enabled");
    let users = requests
        .iter()
        .find(|r| r.url.path() == "/users")
        .expect("users request");
    let repos = requests
        .iter()
        .find(|r| r.url.path() == "/repositories")
        .expect("repositories request");

    assert!(users.url.query_pairs().any(|(k, v)| k == "per_page" && v == "100"));
    assert!(!repos.url.query_pairs().any(|(k, _)| k == "per_page"));
}

#[tokio::test]
async fn test_user_agent_header_identifies_crawler() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .and(header(
            "user-agent",
            "TestBot/1.0.0 (+https://example.com/contact; test@example.com)",
        ))
        .and(header("accept", "application/vnd.github+json"))
        .respond_with(listing(&[]))
        .expect(1)
        .mount(&server)
        .await;

    let clock = Arc::new(ManualClock::new(start()));
    let engine = create_engine(&server, clock);

    // Any other agent falls through to wiremock's 404 and fails the crawl
    engine
        .crawl_all(EntityKind::Users, CrawlRange::unbounded())
        .await
        .expect("Request should carry the configured user agent");
}

#[tokio::test]
async fn test_exhausted_quota_waits_then_resumes_same_cursor() {
    let server = MockServer::start().await;
    let reset = start() + chrono::Duration::seconds(60);

    mount_page(&server, "/users", "0", listing(&[1, 2])).await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .and(query_param("since", "2"))
        .respond_with(
            ResponseTemplate::new(403)
                .set_body_json(json!({"message": "API rate limit exceeded"}))
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset", reset.timestamp().to_string().as_str()),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_page(&server, "/users", "2", listing(&[3])).await;
    mount_page(&server, "/users", "3", listing(&[])).await;

    let clock = Arc::new(ManualClock::new(start()));
    let engine = create_engine(&server, clock.clone());

    let outcome = engine
        .crawl_all(EntityKind::Users, CrawlRange::unbounded())
        .await
        .expect("Crawl should survive quota exhaustion");

    let ids: Vec<u64> = outcome.records.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(outcome.quota_waits, 1);
    assert!(clock.now() >= reset);
}

#[tokio::test]
async fn test_secondary_rate_limit_cools_down_and_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .and(query_param("since", "0"))
        .respond_with(
            ResponseTemplate::new(403)
                .set_body_json(json!({"message": "You have exceeded a secondary rate limit"}))
                .insert_header("retry-after", "60"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_page(&server, "/users", "0", listing(&[1])).await;
    mount_page(&server, "/users", "1", listing(&[])).await;
    Mock::given(method("GET"))
        .and(path("/rate_limit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rate_limit_body(4000, 1792152000)))
        .mount(&server)
        .await;

    let clock = Arc::new(ManualClock::new(start()));
    let engine = create_engine(&server, clock.clone());

    let outcome = engine
        .crawl_all(EntityKind::Users, CrawlRange::unbounded())
        .await
        .expect("Crawl should survive one throttle");

    assert_eq!(outcome.records.len(), 1);
    // Default cool-down (300s) outlasts the 60s Retry-After
    assert_eq!(clock.now(), start() + chrono::Duration::seconds(300));
}

#[tokio::test]
async fn test_server_error_aborts_with_cursor() {
    let server = MockServer::start().await;
    mount_page(&server, "/users", "0", listing(&[1, 2, 3])).await;
    mount_page(
        &server,
        "/users",
        "3",
        ResponseTemplate::new(500).set_body_string("Internal Server Error"),
    )
    .await;

    let clock = Arc::new(ManualClock::new(start()));
    let engine = create_engine(&server, clock.clone());

    let err = engine
        .crawl_all(EntityKind::Users, CrawlRange::unbounded())
        .await
        .unwrap_err();

    match err {
        CensusError::Upstream { cursor, message } => {
            assert_eq!(cursor, Cursor(3));
            assert!(message.contains("500"), "message was {message:?}");
        }
        other => panic!("expected upstream error, got {:?}", other),
    }
    assert_eq!(clock.sleep_count(), 0);
}

#[tokio::test]
async fn test_forbidden_without_rate_limit_is_upstream() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/users",
        "0",
        ResponseTemplate::new(403)
            .set_body_json(json!({"message": "Resource not accessible"}))
            .insert_header("x-ratelimit-remaining", "4000"),
    )
    .await;

    let clock = Arc::new(ManualClock::new(start()));
    let engine = create_engine(&server, clock.clone());

    let err = engine
        .crawl_all(EntityKind::Users, CrawlRange::unbounded())
        .await
        .unwrap_err();

    assert!(matches!(err, CensusError::Upstream { cursor: Cursor(0), .. }));
    assert_eq!(clock.sleep_count(), 0);
}

#[tokio::test]
async fn test_record_without_id_is_upstream() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/users",
        "0",
        ResponseTemplate::new(200).set_body_json(json!([{"id": 1}, {"login": "ghost"}])),
    )
    .await;

    let clock = Arc::new(ManualClock::new(start()));
    let engine = create_engine(&server, clock);

    let err = engine
        .crawl_all(EntityKind::Users, CrawlRange::unbounded())
        .await
        .unwrap_err();

    assert!(matches!(err, CensusError::Upstream { cursor: Cursor(0), .. }));
}

#[tokio::test]
async fn test_fork_repositories_skipped() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/repositories",
        "0",
        ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "full_name": "octo/one", "fork": false},
            {"id": 2, "full_name": "octo/two", "fork": true},
            {"id": 3, "full_name": "octo/three", "fork": false},
        ])),
    )
    .await;
    mount_page(&server, "/repositories", "3", listing(&[])).await;

    let clock = Arc::new(ManualClock::new(start()));
    let engine = create_engine(&server, clock);

    let outcome = engine
        .crawl_all(EntityKind::Repositories, CrawlRange::unbounded())
        .await
        .expect("Crawl should succeed");

    let names: Vec<&str> = outcome
        .records
        .iter()
        .filter_map(|r| r.attributes["full_name"].as_str())
        .collect();
    assert_eq!(names, vec!["octo/one", "octo/three"]);
    assert_eq!(outcome.last_cursor, Cursor(3));
}

#[tokio::test]
async fn test_fetch_quota_reads_core_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rate_limit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rate_limit_body(42, 1792152000)))
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri());
    let fetcher = GitHubFetcher::from_config(&config.api, &config.user_agent).unwrap();

    let quota = fetcher.fetch_quota().await.expect("Quota should parse");

    assert_eq!(quota.limit, Some(5000));
    assert_eq!(quota.remaining, 42);
    assert_eq!(quota.reset.parse().unwrap().timestamp(), 1792152000);
}

#[tokio::test]
async fn test_preflight_waits_for_spent_quota() {
    let server = MockServer::start().await;
    let reset = start() + chrono::Duration::seconds(90);
    Mock::given(method("GET"))
        .and(path("/rate_limit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rate_limit_body(0, reset.timestamp())))
        .mount(&server)
        .await;
    mount_page(&server, "/users", "0", listing(&[])).await;

    let clock = Arc::new(ManualClock::new(start()));
    let engine = create_engine(&server, clock.clone()).with_preflight_quota(true);

    let outcome = engine
        .crawl_all(EntityKind::Users, CrawlRange::unbounded())
        .await
        .unwrap();

    assert_eq!(outcome.quota_waits, 1);
    assert!(clock.now() >= reset);
}

/// Serves `since` listings over ids `1..=max_id`, one record per page
struct Population {
    max_id: u64,
}

impl Respond for Population {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let since = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "since")
            .and_then(|(_, v)| v.parse::<u64>().ok())
            .unwrap_or(0);
        if since < self.max_id {
            listing(&[since + 1])
        } else {
            listing(&[])
        }
    }
}

#[tokio::test]
async fn test_estimate_population_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(Population { max_id: 733 })
        .mount(&server)
        .await;

    let clock = Arc::new(ManualClock::new(start()));
    let engine = create_engine(&server, clock);

    let estimate = engine
        .estimate_population(EntityKind::Users)
        .await
        .expect("Estimate should succeed");

    assert_eq!(estimate.boundary, 733);
    assert_eq!(estimate.probes(), 20);

    let requests = server.received_requests().await.expect("Recording enabled");
    assert_eq!(requests.len(), estimate.probes());
    assert!(requests
        .iter()
        .all(|r| r.url.query_pairs().any(|(k, v)| k == "per_page" && v == "1")));
}
