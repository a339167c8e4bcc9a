// CLI server commands: serve, init-db, status

use std::path::PathBuf;

use reqwest::Client;
use serde_json::Value;

use super::{base_url, connection_error_message};
use crate::daemon::{self, ServeOptions};

fn handle_request_error(err: reqwest::Error, host: &str, port: u16) -> anyhow::Error {
    if err.is_connect() || err.is_timeout() {
        anyhow::anyhow!("{}", connection_error_message(host, port))
    } else {
        anyhow::anyhow!("Request failed: {}", err)
    }
}

/// jobmon serve
pub async fn cmd_serve(
    config: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
    verbose: bool,
) -> anyhow::Result<()> {
    daemon::start_server(ServeOptions {
        config_path: config,
        host,
        port,
        data_dir,
        verbose,
    })
    .await
}

/// jobmon init-db
pub fn cmd_init_db(
    config: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    verbose: bool,
) -> anyhow::Result<()> {
    let _guard = daemon::init_tracing(verbose, None);
    let db_path = daemon::init_db(&ServeOptions {
        config_path: config,
        data_dir,
        verbose,
        ..Default::default()
    })?;
    println!("Database ready at {}", db_path.display());
    Ok(())
}

/// jobmon status
pub async fn cmd_status(host: &str, port: u16, verbose: bool) -> anyhow::Result<()> {
    let client = Client::new();
    let url = format!("{}/health", base_url(host, port));

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;

    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to parse response: {}", e))?;

    if !status.is_success() {
        let message = body["error"].as_str().unwrap_or("Server returned an error");
        anyhow::bail!("{}", message);
    }

    let server_status = body["status"].as_str().unwrap_or("unknown");
    let version = body["version"].as_str().unwrap_or("unknown");
    let uptime = body["uptime_seconds"].as_u64().unwrap_or(0);
    let archivings = body["outstanding_archivings"].as_u64().unwrap_or(0);

    println!("Server Status: {}", server_status);
    println!("  API:         {}/api/", base_url(host, port));
    println!("  Archiving:   {} outstanding", archivings);
    println!("  Uptime:      {}", format_uptime(uptime));
    println!("  Version:     {}", version);

    if verbose {
        println!("\nRaw response:");
        println!("{}", serde_json::to_string_pretty(&body)?);
    }

    Ok(())
}

fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, mins, secs)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
