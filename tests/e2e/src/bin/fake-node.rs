//! Minimal stand-in for a cluster server.
//!
//! Reads the rendered `config/<file>` under `--home`, binds `http.port` on
//! loopback, writes its pid to `pidfile`, and answers every request with
//! `ok`. Behaviour can be changed through the node environment:
//!
//! - `FAKE_NODE_CRASH=1` - print an error and exit 1 before binding
//! - `FAKE_NODE_DELAY_MS=<n>` - sleep before binding

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "fake-node")]
struct Args {
    /// Distribution home directory
    #[arg(long)]
    home: PathBuf,

    /// Configuration file name under `<home>/config`
    #[arg(long, default_value = "server.yml")]
    config_file: String,

    /// Server arguments forwarded by the orchestrator (ignored, echoed)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    rest: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    println!("fake-node starting with args {:?}", args.rest);

    let config_path = args.home.join("config").join(&args.config_file);
    let settings = read_settings(&config_path)?;
    println!(
        "fake-node {} of cluster {}",
        setting(&settings, "node.name")?,
        setting(&settings, "cluster.name")?
    );

    if std::env::var("FAKE_NODE_CRASH").is_ok_and(|v| v == "1") {
        eprintln!("fatal: crash requested");
        std::process::exit(1);
    }
    if let Some(delay) = std::env::var("FAKE_NODE_DELAY_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
    {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let port: u16 = setting(&settings, "http.port")?
        .parse()
        .context("http.port is not a port number")?;
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("Failed to bind 127.0.0.1:{}", port))?;

    let pid_file = PathBuf::from(setting(&settings, "pidfile")?);
    std::fs::write(&pid_file, std::process::id().to_string())
        .with_context(|| format!("Failed to write {}", pid_file.display()))?;
    println!("fake-node listening on {}", port);

    let app = Router::new().route("/", get(|| async { "ok" }));
    axum::serve(listener, app).await?;
    Ok(())
}

/// Parse `key: value` lines.
fn read_settings(path: &std::path::Path) -> Result<HashMap<String, String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(text
        .lines()
        .filter_map(|line| line.split_once(": "))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect())
}

fn setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    settings
        .get(key)
        .map(String::as_str)
        .with_context(|| format!("missing setting '{}'", key))
}
