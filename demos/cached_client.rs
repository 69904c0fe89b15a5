//! Calls a local upstream through the full pipeline and prints the metrics.
//!
//! ```text
//! RUST_LOG=cachet=debug cargo run --example cached_client
//! ```

use std::time::Duration;

use cachet::metrics::{Metrics, Registry};
use cachet::{BaseClient, CacheConfig, Cacher, Caller, Instrumented, Request};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"{
    "application": "demo",
    "default_ttl_secs": 60,
    "cleanup_interval_secs": 300,
    "rules": [
        { "endpoint": "/time", "methods": ["GET"], "ttl_secs": 2 }
    ]
}"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let upstream = format!("http://{}", listener.local_addr()?);
    tokio::spawn(async move {
        let mut served = 0u32;
        while let Ok((mut stream, _)) = listener.accept().await {
            served += 1;
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let body = format!("{{\"served\":{served}}}");
            let reply = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(reply.as_bytes()).await;
        }
    });

    let config = CacheConfig::from_json(CONFIG)?;
    let table = config.table();
    table.validate()?;

    let registry = Registry::new();
    let metrics = Metrics::new("demo", "upstream", Some(&registry))?;
    let client = Cacher::new(
        Instrumented::new(BaseClient::new(), config.application.as_str(), Some(metrics)),
        table,
        config.default_ttl(),
        config.cleanup_interval(),
    );

    for round in 1..=4 {
        let response = client.call(Request::get(&format!("{upstream}/time"))?).await?;
        println!("round {round}: {} {}", response.status(), response.text());
        if round == 2 {
            tokio::time::sleep(Duration::from_secs(3)).await;
        }
    }

    print!("{}", registry.render());
    Ok(())
}
