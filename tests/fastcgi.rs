//! FastCGI gateway against a fake responder speaking the wire protocol.

use std::net::SocketAddr;

use bytes::BytesMut;
use edgeway::fastcgi::wire::{put_record, put_stream, read_record, RecordType};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

mod common;

fn decode_params(mut raw: &[u8]) -> Vec<(String, String)> {
    fn length(raw: &mut &[u8]) -> usize {
        if raw[0] & 0x80 == 0 {
            let n = raw[0] as usize;
            *raw = &raw[1..];
            n
        } else {
            let n = u32::from_be_bytes([raw[0] & 0x7f, raw[1], raw[2], raw[3]]) as usize;
            *raw = &raw[4..];
            n
        }
    }
    let mut pairs = Vec::new();
    while !raw.is_empty() {
        let n = length(&mut raw);
        let v = length(&mut raw);
        pairs.push((
            String::from_utf8_lossy(&raw[..n]).into_owned(),
            String::from_utf8_lossy(&raw[n..n + v]).into_owned(),
        ));
        raw = &raw[n + v..];
    }
    pairs
}

/// Responds with the received environment, one `NAME=value` per line.
async fn start_env_responder() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut params = Vec::new();
                let mut stdin = Vec::new();
                loop {
                    let Ok((header, content)) = read_record(&mut socket).await else {
                        return;
                    };
                    match header.record_type() {
                        Some(RecordType::Params) => params.extend_from_slice(&content),
                        Some(RecordType::Stdin) if content.is_empty() => break,
                        Some(RecordType::Stdin) => stdin.extend_from_slice(&content),
                        _ => {}
                    }
                }

                let mut body = String::new();
                for (name, value) in decode_params(&params) {
                    body.push_str(&format!("{name}={value}\n"));
                }
                body.push_str(&format!("STDIN={}\n", String::from_utf8_lossy(&stdin)));

                let mut out = b"Content-Type: text/plain\r\nX-Gateway: fake\r\n\
                    Set-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\n"
                    .to_vec();
                out.extend_from_slice(body.as_bytes());

                let mut reply = BytesMut::new();
                put_stream(&mut reply, RecordType::Stdout, &out);
                put_record(&mut reply, RecordType::EndRequest, &[0u8; 8]);
                let _ = socket.write_all(&reply).await;
            });
        }
    });
    addr
}

fn edge_config(backend: SocketAddr) -> String {
    edge_config_on("127.0.0.1:0", backend)
}

fn edge_config_on(listen: &str, backend: SocketAddr) -> String {
    format!(
        r#"
[[upstreams]]
name = "php"
backends = [{{ address = "{backend}" }}]

[[servers]]
address = "{listen}"
root = "/srv/www"
server_name = "edge.test"

[[servers.directives]]
kind = "fastcgi"
location = ["php", "\\.php"]
upstream = "php"
split_path_info = "^(.+?\\.php)(/.*)?$"
params = [["APP_ENV", "test"], ["SCRIPT", "{{fastcgi_script_name}}"]]
"#
    )
}

fn env_value<'a>(body: &'a str, name: &str) -> Option<&'a str> {
    body.lines()
        .find_map(|line| line.strip_prefix(name)?.strip_prefix('='))
}

#[tokio::test]
async fn test_gateway_environment() {
    let backend = start_env_responder().await;
    let edge = common::start_edge(&edge_config(backend)).await;

    let res = common::client()
        .get(edge.url("/shop/cart.php/items/3?sort=asc"))
        .header("X-Trace", "t-1")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-gateway"], "fake");

    let body = res.text().await.unwrap();
    assert_eq!(env_value(&body, "SCRIPT_NAME"), Some("/shop/cart.php"));
    assert_eq!(env_value(&body, "PATH_INFO"), Some("/items/3"));
    assert_eq!(env_value(&body, "SCRIPT_FILENAME"), Some("/srv/www/shop/cart.php"));
    assert_eq!(env_value(&body, "DOCUMENT_ROOT"), Some("/srv/www"));
    assert_eq!(env_value(&body, "QUERY_STRING"), Some("sort=asc"));
    assert_eq!(env_value(&body, "REQUEST_METHOD"), Some("GET"));
    assert_eq!(env_value(&body, "SERVER_NAME"), Some("edge.test"));
    assert_eq!(env_value(&body, "GATEWAY_INTERFACE"), Some("CGI/1.1"));
    assert_eq!(env_value(&body, "HTTP_X_TRACE"), Some("t-1"));
    assert_eq!(env_value(&body, "APP_ENV"), Some("test"));
    assert_eq!(env_value(&body, "SCRIPT"), Some("/shop/cart.php"));
}

#[tokio::test]
async fn test_gateway_keeps_repeated_headers() {
    let backend = start_env_responder().await;
    let edge = common::start_edge(&edge_config(backend)).await;

    let res = common::client().get(edge.url("/index.php")).send().await.unwrap();
    let cookies: Vec<&str> = res
        .headers()
        .get_all("set-cookie")
        .iter()
        .map(|v| v.to_str().unwrap())
        .collect();
    assert_eq!(cookies, vec!["a=1", "b=2"]);
}

#[tokio::test]
async fn test_gateway_server_addr_is_connection_local() {
    let backend = start_env_responder().await;
    let edge = common::start_edge(&edge_config_on("0.0.0.0:0", backend)).await;
    let url = format!("http://127.0.0.1:{}/index.php", edge.addr.port());

    let res = common::client().get(url).send().await.unwrap();
    let body = res.text().await.unwrap();
    assert_eq!(env_value(&body, "SERVER_ADDR"), Some("127.0.0.1"));
    let port = edge.addr.port().to_string();
    assert_eq!(env_value(&body, "SERVER_PORT"), Some(port.as_str()));
}

#[tokio::test]
async fn test_gateway_get_body() {
    let backend = start_env_responder().await;
    let edge = common::start_edge(&edge_config(backend)).await;

    let res = common::client()
        .get(edge.url("/search.php"))
        .body("q=edge")
        .send()
        .await
        .unwrap();
    let body = res.text().await.unwrap();
    assert_eq!(env_value(&body, "REQUEST_METHOD"), Some("GET"));
    assert_eq!(env_value(&body, "CONTENT_LENGTH"), Some("6"));
    assert_eq!(env_value(&body, "STDIN"), Some("q=edge"));
}

#[tokio::test]
async fn test_gateway_post_body() {
    let backend = start_env_responder().await;
    let edge = common::start_edge(&edge_config(backend)).await;

    let res = common::client()
        .post(edge.url("/form.php"))
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body("name=edge")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let body = res.text().await.unwrap();
    assert_eq!(env_value(&body, "REQUEST_METHOD"), Some("POST"));
    assert_eq!(env_value(&body, "CONTENT_LENGTH"), Some("9"));
    assert_eq!(
        env_value(&body, "CONTENT_TYPE"),
        Some("application/x-www-form-urlencoded")
    );
    assert_eq!(env_value(&body, "STDIN"), Some("name=edge"));
    assert_eq!(env_value(&body, "PATH_INFO"), None);
}

#[tokio::test]
async fn test_gateway_unreachable_backend_is_502() {
    let backend = common::closed_port().await;
    let edge = common::start_edge(&edge_config(backend)).await;

    let res = common::client().get(edge.url("/index.php")).send().await.unwrap();
    assert_eq!(res.status(), 502);
    assert_eq!(res.text().await.unwrap(), "[fcgi] fail to connect backend");
}

#[tokio::test]
async fn test_gateway_ignores_other_paths() {
    let backend = start_env_responder().await;
    let edge = common::start_edge(&edge_config(backend)).await;

    let res = common::client().get(edge.url("/style.css")).send().await.unwrap();
    assert_eq!(res.status(), 404);
}
