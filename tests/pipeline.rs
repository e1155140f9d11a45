//! Directive composition, slots and terminals through a live listener.

use std::fs;

mod common;

#[tokio::test]
async fn test_access_log_records_request_id_and_final_status() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("logs").join("access.json");
    let edge = common::start_edge(&format!(
        r#"
[[servers]]
address = "127.0.0.1:0"

[servers.request_id]
header = "X-Request-Id"

[servers.access_log]
format = ["request_id", "method", "request_uri", "status", "status"]
access_path = "{}"

[[servers.directives]]
kind = "response"
path = "/hello"
body = "hi"
code = 201
"#,
        log_path.display()
    ))
    .await;

    let client = common::client();
    let res = client
        .get(edge.url("/hello?x=1"))
        .header("X-Request-Id", "client-chosen")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 201);
    assert_eq!(res.text().await.unwrap(), "hi");

    let res = client.get(edge.url("/missing")).send().await.unwrap();
    assert_eq!(res.status(), 404);

    let content = fs::read_to_string(&log_path).unwrap();
    let lines: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);

    let first = lines[0].as_object().unwrap();
    let keys: Vec<&str> = first.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["request_id", "method", "request_uri", "status"]);
    assert_eq!(first["status"], 201);
    assert_eq!(first["request_uri"], "/hello");
    let id = first["request_id"].as_str().unwrap();
    assert_ne!(id, "client-chosen");
    assert_eq!(id.len(), 36);

    assert_eq!(lines[1]["status"], 404);
    assert_ne!(lines[1]["request_id"], lines[0]["request_id"]);
}

#[tokio::test]
async fn test_rewrite_then_header_then_response() {
    let backend = common::start_echo_backend().await;
    let edge = common::start_edge(&format!(
        r#"
[[servers]]
address = "127.0.0.1:0"

[[servers.directives]]
kind = "rewrite"
from = "^/v1/(.*)$"
to = "/api/{{1}}"

[[servers.directives]]
kind = "header"
path = "/api"
headers = [["X-Client-Ip", "{{remote}}"], ["X-Query-Id", "{{?id}}"]]

[[servers.directives]]
kind = "proxy"
location = "/api"
backends = ["{backend}"]
"#
    ))
    .await;

    let res = common::client()
        .get(edge.url("/v1/users?id=9"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let head = res.text().await.unwrap().to_ascii_lowercase();
    assert!(head.starts_with("get /api/users?id=9 http/1.1"));
    assert!(head.contains("x-client-ip: 127.0.0.1"));
    assert!(head.contains("x-query-id: 9"));
}

#[tokio::test]
async fn test_not_found_file_with_custom_code() {
    let dir = tempfile::tempdir().unwrap();
    let page = dir.path().join("404.html");
    fs::write(&page, "<h1>nothing here</h1>").unwrap();
    let edge = common::start_edge(&format!(
        r#"
[[servers]]
address = "127.0.0.1:0"

[servers.not_found]
code = 410
file = "{}"
"#,
        page.display()
    ))
    .await;

    let res = common::client().get(edge.url("/gone")).send().await.unwrap();
    assert_eq!(res.status(), 410);
    assert_eq!(res.text().await.unwrap(), "<h1>nothing here</h1>");
}

#[tokio::test]
async fn test_static_files_and_status_override() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("robots.txt"), "User-agent: *").unwrap();
    let edge = common::start_edge(&format!(
        r#"
[[servers]]
address = "127.0.0.1:0"
root = "{}"

[[servers.directives]]
kind = "status"
code = 418
paths = ["/teapot"]

[[servers.directives]]
kind = "static"
path = "/files"
"#,
        dir.path().display()
    ))
    .await;

    let client = common::client();
    let res = client.get(edge.url("/files/robots.txt")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "User-agent: *");

    let res = client.get(edge.url("/files/absent.txt")).send().await.unwrap();
    assert_eq!(res.status(), 404);

    // the not-found terminal writes its own status over the override
    let res = client.get(edge.url("/teapot")).send().await.unwrap();
    assert_eq!(res.status(), 404);
}

#[tokio::test]
async fn test_response_pattern_before_proxy() {
    let backend = common::start_mock_backend("proxied").await;
    let edge = common::start_edge(&format!(
        r#"
[[servers]]
address = "127.0.0.1:0"

[[servers.directives]]
kind = "response"
pattern = "\\.(git|env)"
code = 403
body = "denied"

[[servers.directives]]
kind = "proxy"
backends = ["{backend}"]
"#
    ))
    .await;

    let client = common::client();
    let res = client.get(edge.url("/.env")).send().await.unwrap();
    assert_eq!(res.status(), 403);
    assert_eq!(res.text().await.unwrap(), "denied");

    let res = client.get(edge.url("/index")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "proxied");
}
