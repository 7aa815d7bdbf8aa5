//! Status command implementation.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// Health response from the server.
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    #[serde(default)]
    uptime_seconds: u64,
    components: BTreeMap<String, ComponentStatus>,
}

/// Component status from the server.
#[derive(Debug, Deserialize)]
struct ComponentStatus {
    status: String,
    message: Option<String>,
}

/// Show status and health.
pub async fn run(url: &str, metrics_url: &str) -> Result<()> {
    println!("Checking health at {}...\n", url);

    let health_url = format!("{}/health", url.trim_end_matches('/'));
    let client = reqwest::Client::new();

    match client.get(&health_url).send().await {
        Ok(response) => {
            let status_code = response.status();
            match response.json::<HealthResponse>().await {
                Ok(health) => print_health_status(&health, status_code.as_u16()),
                Err(e) => {
                    println!("Failed to parse health response: {}", e);
                    println!("HTTP Status: {}", status_code);
                }
            }
        }
        Err(e) => {
            println!("Failed to connect to health endpoint: {}", e);
            println!("\nIs the orderlake writer running?");
            println!("Start it with: orderlake ingest --config <path-to-config>");
            return Ok(());
        }
    }

    let metrics_url = format!("{}/metrics", metrics_url.trim_end_matches('/'));

    println!("\n--- Metrics ---");
    println!("Fetching from {}...\n", metrics_url);

    match client.get(&metrics_url).send().await {
        Ok(response) => {
            let text = response.text().await.context("Failed to read metrics")?;
            print_metrics(&parse_metrics(&text));
        }
        Err(e) => {
            println!("Failed to fetch metrics: {}", e);
        }
    }

    Ok(())
}

fn status_marker(status: &str) -> &'static str {
    match status {
        "healthy" => "[OK]",
        "degraded" => "[WARN]",
        "unhealthy" => "[FAIL]",
        _ => "[?]",
    }
}

fn print_health_status(health: &HealthResponse, status_code: u16) {
    println!(
        "{} Overall Status: {} (HTTP {}, up {}s)",
        status_marker(&health.status),
        health.status.to_uppercase(),
        status_code,
        health.uptime_seconds
    );
    println!();

    if !health.components.is_empty() {
        println!("Components:");
        for (name, status) in &health.components {
            let marker = status_marker(&status.status);
            match &status.message {
                Some(msg) => println!("  {} {}: {} ({})", marker, name, status.status, msg),
                None => println!("  {} {}: {}", marker, name, status.status),
            }
        }
    }
}

/// Sum Prometheus text samples by metric name, folding labelled series together.
fn parse_metrics(metrics_text: &str) -> HashMap<String, f64> {
    let mut values: HashMap<String, f64> = HashMap::new();

    for line in metrics_text.lines() {
        if line.starts_with('#') || line.is_empty() {
            continue;
        }

        let Some((series, value)) = line.rsplit_once(' ') else {
            continue;
        };
        let Ok(value) = value.parse::<f64>() else {
            continue;
        };
        let name = series.split('{').next().unwrap_or(series);
        *values.entry(name.to_string()).or_default() += value;
    }

    values
}

fn print_metrics(values: &HashMap<String, f64>) {
    let rows = [
        ("orderlake_messages_total", "Messages Consumed:"),
        ("orderlake_records_accepted_total", "Records Accepted: "),
        ("orderlake_records_rejected_total", "Records Rejected: "),
        ("orderlake_batches_written_total", "Batches Written:  "),
        ("orderlake_batches_failed_total", "Batches Failed:   "),
        ("orderlake_write_retries_total", "Write Retries:    "),
        ("orderlake_files_written_total", "Files Written:    "),
        ("orderlake_bytes_written_total", "Bytes Written:    "),
        ("orderlake_offset_commits_total", "Offset Commits:   "),
        ("orderlake_open_batch_records", "Open Batch Size:  "),
    ];

    let mut printed = false;
    for (name, label) in rows {
        if let Some(v) = values.get(name) {
            println!("{} {}", label, format_number(*v as u64));
            printed = true;
        }
    }

    if !printed {
        println!("No metrics available yet.");
    }
}

fn format_number(n: u64) -> String {
    if n >= 1_000_000_000 {
        format!("{:.2}B", n as f64 / 1_000_000_000.0)
    } else if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.2}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}
