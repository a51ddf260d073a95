//! Integration tests for the crawl engine
//!
//! These tests use wiremock to create mock HTTP servers and drive the full
//! engine: scheduler, plugin pipeline and HTTP fetcher together.

use ripple_engine::config::{parse_config, EngineConfig};
use ripple_engine::crawler::HttpFetcher;
use ripple_engine::resource::StaticSampler;
use ripple_engine::task::TaskResult;
use ripple_engine::{Engine, ResourceMonitor, Task};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Fast, deterministic settings
fn create_test_config(extra: &str) -> EngineConfig {
    let base = r#"
[scheduler]
concurrency = 4

[rate-limit]
capacity = 100
refill-rate = 100.0

[rate-limit.per-domain]
capacity = 100
refill-rate = 100.0

[retry]
base-delay = 20
max-delay = 100
jitter = false

[delay]
default-delay = 0

[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"
"#;
    parse_config(&format!("{}\n{}", base, extra)).expect("test config must be valid")
}

/// HTTP engine whose admission ignores the host's memory and load
fn create_engine(config: EngineConfig) -> Engine {
    let fetcher = HttpFetcher::new(&config.fetch, &config.user_agent).unwrap();
    let monitor = ResourceMonitor::with_sampler(
        config.scheduler.resource_limits.clone(),
        Box::new(StaticSampler::new()),
    );
    Engine::with_monitor(config, Arc::new(fetcher), monitor).unwrap()
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html")
}

async fn mount_page(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(html(body))
        .mount(server)
        .await;
}

fn collect_results() -> (Arc<Mutex<Vec<TaskResult>>>, ripple_engine::task::ResultCallback) {
    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = results.clone();
    let callback: ripple_engine::task::ResultCallback = Arc::new(move |result: &TaskResult| {
        sink.lock().unwrap().push(result.clone());
    });
    (results, callback)
}

#[tokio::test]
async fn test_full_crawl_single_domain() {
    let server = MockServer::start().await;

    mount_page(
        &server,
        "/",
        r#"<html><head><title>Home</title></head><body>
            <a href="/page1">One</a>
            <a href="/page2">Two</a>
        </body></html>"#,
    )
    .await;
    mount_page(&server, "/page1", r#"<a href="/page3">Three</a><a href="/">Home</a>"#).await;
    mount_page(&server, "/page2", "<p>Two</p>").await;
    mount_page(&server, "/page3", "<p>Three</p>").await;

    let config = create_test_config(&format!(
        "[[seeds]]\nurl = \"{}/\"\nmax-depth = 2\n",
        server.uri()
    ));
    let engine = create_engine(config);
    assert_eq!(engine.add_seeds().await.unwrap(), 1);

    let summary = engine.run().await.unwrap();

    assert_eq!(summary.succeeded, 4);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.discovered, 3);
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_depth_limit_is_respected() {
    let server = MockServer::start().await;

    mount_page(&server, "/", r#"<a href="/d1">d1</a>"#).await;
    mount_page(&server, "/d1", r#"<a href="/d2">d2</a>"#).await;
    mount_page(&server, "/d2", r#"<a href="/d3">d3</a>"#).await;

    let engine = create_engine(create_test_config(""));
    let task = Task::new(format!("{}/", server.uri())).with_follow(json!({ "max-depth": 1 }));
    engine.add_task(task).await.unwrap();

    let summary = engine.run().await.unwrap();

    assert_eq!(summary.succeeded, 2);
    let paths: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect();
    assert!(!paths.contains(&"/d2".to_string()));
}

#[tokio::test]
async fn test_extraction_reaches_callback() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/article",
        r#"<html><head><title>Article</title></head><body>
            <h1>Headline</h1>
            <span class="tag">rust</span><span class="tag">crawler</span>
        </body></html>"#,
    )
    .await;

    let engine = create_engine(create_test_config(""));
    let (results, callback) = collect_results();
    let task = Task::new(format!("{}/article", server.uri()))
        .with_extract(json!({
            "headline": "h1",
            "tags": { "selector": ".tag", "all": true },
        }))
        .on_result(callback);
    engine.add_task(task).await.unwrap();

    engine.run().await.unwrap();

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    let parsed = results[0].parsed.as_ref().unwrap();
    assert_eq!(parsed["title"], "Article");
    assert_eq!(parsed["data"]["headline"], "Headline");
    assert_eq!(parsed["data"]["tags"], json!(["rust", "crawler"]));
}

#[tokio::test]
async fn test_server_error_is_retried_until_success() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_page(&server, "/flaky", "<p>ok</p>").await;

    let engine = create_engine(create_test_config(""));
    let (results, callback) = collect_results();
    engine
        .add_task(Task::new(format!("{}/flaky", server.uri())).on_result(callback))
        .await
        .unwrap();

    let summary = engine.run().await.unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.retried, 2);
    assert_eq!(summary.failed, 0);

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_success());
    assert_eq!(results[0].retry_count, 2);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut config = create_test_config("");
    config.retry.max_retries = 2;
    let engine = create_engine(config);
    let (results, callback) = collect_results();
    engine
        .add_task(Task::new(format!("{}/down", server.uri())).on_result(callback))
        .await
        .unwrap();

    let summary = engine.run().await.unwrap();

    assert_eq!(server.received_requests().await.unwrap().len(), 3);
    assert_eq!(summary.failed, 1);

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    let error = results[0].error.as_ref().unwrap();
    assert_eq!(error.status, Some(500));
}

#[tokio::test]
async fn test_retry_after_blocks_domain() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_page(&server, "/limited", "<p>ok</p>").await;

    let engine = create_engine(create_test_config(""));
    engine
        .add_url(&format!("{}/limited", server.uri()))
        .await
        .unwrap();

    let start = Instant::now();
    let summary = engine.run().await.unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.retried, 1);
    assert!(start.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
async fn test_politeness_delay_spaces_requests() {
    let server = MockServer::start().await;
    mount_page(&server, "/", r#"<a href="/a">a</a><a href="/b">b</a>"#).await;
    mount_page(&server, "/a", "<p>a</p>").await;
    mount_page(&server, "/b", "<p>b</p>").await;

    let mut config = create_test_config("");
    config.delay.default_delay = 150;
    let engine = create_engine(config);
    engine
        .add_task(Task::new(format!("{}/", server.uri())).with_follow(json!({})))
        .await
        .unwrap();

    let start = Instant::now();
    let summary = engine.run().await.unwrap();

    assert_eq!(summary.succeeded, 3);
    // Three requests to one host need at least two full gaps
    assert!(start.elapsed() >= Duration::from_millis(290));
}

#[tokio::test]
async fn test_duplicate_urls_are_fetched_once() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/",
        r#"<a href="/same">1</a><a href="/same/">2</a><a href="/SAME#x">3</a>"#,
    )
    .await;
    mount_page(&server, "/same", "<p>same</p>").await;

    let engine = create_engine(create_test_config(""));
    engine
        .add_task(Task::new(format!("{}/", server.uri())).with_follow(json!({})))
        .await
        .unwrap();

    let summary = engine.run().await.unwrap();

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.discovered, 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_cross_domain_links_are_not_followed_by_default() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/",
        r#"<a href="/local">local</a><a href="http://localhost:9/remote">remote</a>"#,
    )
    .await;
    mount_page(&server, "/local", "<p>local</p>").await;

    let engine = create_engine(create_test_config(""));
    engine
        .add_task(Task::new(format!("{}/", server.uri())).with_follow(json!({})))
        .await
        .unwrap();

    let summary = engine.run().await.unwrap();

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 0);
}
