//! Fire a batch of concurrent queries down one connection and watch them
//! come back in submission order.
//!
//! ```bash
//! cargo run --example pipelined
//! ```

use std::sync::Arc;
use std::time::Instant;

use pgpipe::{ConnectConfig, Connection};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = ConnectConfig::new(
        env_or("PGHOST", "127.0.0.1"),
        env_or("PGUSER", "postgres"),
        env_or("PGPASSWORD", "postgres"),
        env_or("PGDATABASE", "postgres"),
    );

    let conn = Arc::new(Connection::connect(&cfg).await?);
    let started = Instant::now();

    let mut handles = Vec::new();
    for i in 0..32 {
        let conn = conn.clone();
        handles.push(tokio::spawn(async move {
            let set = conn
                .simple_query(&format!("SELECT {i}, pg_sleep(0.01)"))
                .await?;
            anyhow::Ok(set.rows.len())
        }));
    }

    let mut rows = 0usize;
    for handle in handles {
        rows += handle.await??;
    }
    println!(
        "32 pipelined queries, {rows} rows, {:?} total",
        started.elapsed()
    );

    if let Ok(conn) = Arc::try_unwrap(conn) {
        conn.close().await;
    }
    Ok(())
}
