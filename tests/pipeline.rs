//! End-to-end: Cacher -> Instrumented -> BaseClient against a local server.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use cachet::metrics::{Labels, Metrics, Registry};
use cachet::{BaseClient, CacheConfig, CallError, Cacher, Caller, Instrumented, Request, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

// Serves `/foo` with a JSON document and anything else with 404, counting requests.
async fn upstream() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&hits);
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let read = stream.read(&mut buf).await.unwrap_or(0);
                let head = String::from_utf8_lossy(&buf[..read]);
                let path = head.split_whitespace().nth(1).unwrap_or("/").to_owned();

                let reply = if path.starts_with("/foo") {
                    let body = format!(r#"{{"name":"bar","age":42,"hit":{n}}}"#);
                    format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    )
                } else {
                    "HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\nConnection: close\r\n\r\nnot found"
                        .to_owned()
                };
                let _ = stream.write_all(reply.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (base, hits)
}

fn pipeline(registry: &Registry, config: &str) -> (Cacher<Instrumented<BaseClient>>, Metrics) {
    let config = CacheConfig::from_json(config).unwrap();
    let metrics = Metrics::new("foo", "bar", Some(registry)).unwrap();
    let inner = Instrumented::new(BaseClient::new(), config.application.as_str(), Some(metrics.clone()));
    (Cacher::from_config(inner, &config), metrics)
}

#[derive(Debug, serde::Deserialize)]
struct Person {
    name: String,
    age: u32,
    hit: usize,
}

#[tokio::test]
async fn cached_endpoint_reaches_upstream_once() {
    let (base, hits) = upstream().await;
    let registry = Registry::new();
    let (client, metrics) = pipeline(
        &registry,
        r#"{ "application": "foo", "rules": [ { "endpoint": "/foo", "ttl_secs": 60 } ] }"#,
    );

    for _ in 0..3 {
        let response = client.call(Request::get(&format!("{base}/foo")).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let person: Person = response.json().unwrap();
        assert_eq!(person.name, "bar");
        assert_eq!(person.age, 42);
        assert_eq!(person.hit, 1);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // Hits never reach the metrics stage.
    let labels = Labels::new("foo", "/foo", "GET");
    assert_eq!(metrics.latency().get(&labels).map(|(count, _)| count), Some(1));
    assert_eq!(metrics.errors().get(&labels), Some(0.0));
    assert!(registry.render().contains("foo_bar_api_latency_count"));
}

#[tokio::test]
async fn uncached_endpoint_always_delegates() {
    let (base, hits) = upstream().await;
    let registry = Registry::new();
    let (client, metrics) = pipeline(
        &registry,
        r#"{ "application": "foo", "rules": [ { "endpoint": "/foo" } ] }"#,
    );

    for _ in 0..2 {
        let response = client.call(Request::get(&format!("{base}/bar")).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    let labels = Labels::new("foo", "/bar", "GET");
    assert_eq!(metrics.latency().get(&labels).map(|(count, _)| count), Some(2));
    // A 404 is a response, not a failed call.
    assert_eq!(metrics.errors().get(&labels), Some(0.0));
}

#[tokio::test]
async fn transport_errors_are_counted_and_not_cached() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let registry = Registry::new();
    let (client, metrics) = pipeline(&registry, r#"{ "application": "foo" }"#);

    for _ in 0..2 {
        let err = client
            .call(Request::get(&format!("http://{addr}/foo")).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Connect { .. }));
    }

    let labels = Labels::new("foo", "/foo", "GET");
    assert_eq!(metrics.errors().get(&labels), Some(2.0));
    assert_eq!(metrics.latency().get(&labels).map(|(count, _)| count), Some(2));
}
