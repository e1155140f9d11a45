//! Reverse proxy behaviour through a live listener.

use std::time::Duration;

mod common;

#[tokio::test]
async fn test_proxy_rewrites_headers_both_ways() {
    let backend = common::start_echo_backend().await;
    let edge = common::start_edge(&format!(
        r#"
[[servers]]
address = "127.0.0.1:0"

[[servers.directives]]
kind = "proxy"
location = "/api"
backends = ["{backend}"]
header_upstream = [["X-From", "edge"]]
header_downstream = [["X-Served-By", "edgeway"]]
timeout = "2s"
"#
    ))
    .await;

    let res = common::client()
        .get(edge.url("/api/items?page=3"))
        .header("X-From", "client")
        .send()
        .await
        .expect("edge unreachable");

    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-served-by"], "edgeway");
    assert_eq!(res.headers()["x-backend"], "mock");
    let head = res.text().await.unwrap().to_ascii_lowercase();
    assert!(head.starts_with("get /api/items?page=3 http/1.1"));
    assert!(head.contains("x-from: edge"));
    assert!(!head.contains("x-from: client"));
}

#[tokio::test]
async fn test_proxy_outside_location_is_not_found() {
    let backend = common::start_mock_backend("backend").await;
    let edge = common::start_edge(&format!(
        r#"
[[servers]]
address = "127.0.0.1:0"

[[servers.directives]]
kind = "proxy"
location = "/api"
backends = ["{backend}"]
"#
    ))
    .await;

    let res = common::client().get(edge.url("/web")).send().await.unwrap();
    assert_eq!(res.status(), 404);
    assert_eq!(res.text().await.unwrap(), "not found");
}

#[tokio::test]
async fn test_proxy_by_upstream_name() {
    let backend = common::start_mock_backend("from upstream").await;
    let edge = common::start_edge(&format!(
        r#"
[[upstreams]]
name = "app"
backends = [{{ address = "{backend}" }}]

[[servers]]
address = "127.0.0.1:0"

[[servers.directives]]
kind = "proxy"
upstream = "app"
"#
    ))
    .await;

    let res = common::client().get(edge.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "from upstream");
}

#[tokio::test]
async fn test_proxy_backend_down_is_503() {
    let backend = common::closed_port().await;
    let edge = common::start_edge(&format!(
        r#"
[[servers]]
address = "127.0.0.1:0"

[[servers.directives]]
kind = "proxy"
backends = ["{backend}"]
timeout = "1s"
"#
    ))
    .await;

    let res = common::client().get(edge.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 503);
    assert!(!res.text().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_proxy_slow_backend_is_504() {
    let backend = common::start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        (200, "late".to_string())
    })
    .await;
    let edge = common::start_edge(&format!(
        r#"
[[servers]]
address = "127.0.0.1:0"

[[servers.directives]]
kind = "proxy"
backends = ["{backend}"]
timeout = "200ms"
"#
    ))
    .await;

    let res = common::client().get(edge.url("/slow")).send().await.unwrap();
    assert_eq!(res.status(), 504);
}

#[tokio::test]
async fn test_oversized_body_is_413() {
    let backend = common::start_mock_backend("unused").await;
    let edge = common::start_edge(&format!(
        r#"
[[servers]]
address = "127.0.0.1:0"
max_request_body_size = 16

[[servers.directives]]
kind = "proxy"
backends = ["{backend}"]
"#
    ))
    .await;

    let res = common::client()
        .post(edge.url("/upload"))
        .body(vec![b'x'; 64])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 413);
}
