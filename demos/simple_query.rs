//! Connect, run one query both ways, and print the rows.
//!
//! ```bash
//! cargo run --example simple_query
//! ```
//!
//! Override the endpoint with PGHOST/PGUSER/PGPASSWORD/PGDATABASE.

use pgpipe::value::ValueRow;
use pgpipe::{ConnectConfig, Connection, Value, results};

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

    let conn = Connection::connect(&cfg).await?;
    println!(
        "connected; backend pid {:?}, integer_datetimes {}",
        conn.backend_key().map(|k| k.process_id),
        conn.integer_datetimes()
    );

    let set = conn.simple_query("SELECT version()").await?;
    for row in results::vector(&set, &ValueRow, conn.integer_datetimes())? {
        println!("{row:?}");
    }

    let set = conn
        .query("SELECT $1::int + $2::int", &[Value::Int4(2), Value::Int4(3)])
        .await?;
    let row = results::exactly_one(&set, &ValueRow, conn.integer_datetimes())?;
    println!("2 + 3 = {row:?}");

    conn.close().await;
    Ok(())
}
