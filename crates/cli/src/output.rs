//! Output formatting for result documents, jobs and health reports

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use std::time::Duration;

use subdex_common::{JobState, ProbeStatus, ResultDocument};
use subdex_orchestrator::Health;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(format: &str) -> Self {
        match format.trim().to_lowercase().as_str() {
            "json" | "j" => OutputFormat::Json,
            "text" | "t" | "" => OutputFormat::Text,
            other => {
                eprintln!("Warning: Unknown format '{}', using text", other);
                OutputFormat::Text
            }
        }
    }
}

pub fn print_document(doc: &ResultDocument, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(doc)?),
        OutputFormat::Text => print_document_text(doc),
    }
    Ok(())
}

pub fn print_job(state: &JobState, joined: bool, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let output = json!({ "joined": joined, "job": state });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            let elapsed = (state.updated_at - state.started_at)
                .to_std()
                .unwrap_or_default();
            println!("\nJob {} for {}", state.id, state.target);
            println!("  Status:   {}", state.status);
            println!("  Phase:    {:?}", state.phase);
            println!("  Progress: {}%", state.progress);
            println!("  Elapsed:  {}", format_duration(elapsed));
            if joined {
                println!("  (attached to a job already in progress)");
            }
            if let Some(error) = &state.error {
                println!("  Error:    {}", error);
            }
            if let Some(doc) = &state.result {
                print_document_text(doc);
            }
            println!();
        }
    }
    Ok(())
}

pub fn print_health(health: &Health, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let tools: serde_json::Map<String, serde_json::Value> = health
                .tools
                .iter()
                .map(|(name, ok)| (name.clone(), json!(ok)))
                .collect();
            let output = json!({
                "healthy": health.is_healthy(),
                "cache": match &health.cache {
                    Ok(()) => json!("ok"),
                    Err(e) => json!(e),
                },
                "tools": tools,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            match &health.cache {
                Ok(()) => println!("  cache: ok"),
                Err(e) => println!("  cache: unavailable ({})", e),
            }
            for (name, ok) in &health.tools {
                println!("  {}: {}", name, if *ok { "ok" } else { "missing" });
            }
        }
    }
    Ok(())
}

/// Hosts, then one row per probe record (sorted by host).
fn print_document_text(doc: &ResultDocument) {
    let age = (Utc::now() - doc.updated_at).to_std().unwrap_or_default();

    println!("\n{:-<80}", "");
    println!("Target: {}", doc.target);
    if !doc.root_domains.is_empty() {
        println!("Root domains: {}", doc.root_domains.join(", "));
    }
    if doc.truncated_domains > 0 {
        println!(
            "  ({} further root domain(s) skipped by the organization limit)",
            doc.truncated_domains
        );
    }
    println!("Hosts: {}", doc.hosts.len());
    for host in doc.hosts.iter() {
        println!("  {}", host);
    }

    println!(
        "Probe: {} ({}%, {}/{} batches)",
        doc.probe_status, doc.progress, doc.completed_batches, doc.total_batches
    );
    if let Some(error) = &doc.probe_error {
        println!("Probe error: {}", error);
    }

    if !doc.probe_records.is_empty() {
        let mut records = doc.probe_records.clone();
        records.sort_by(|a, b| a.host.cmp(&b.host));

        println!("{:-<80}", "");
        println!("{:<32} {:<7} {:<40}", "HOST", "STATUS", "TITLE / TECH");
        println!("{:-<80}", "");
        for record in &records {
            let status = record
                .status_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:<32} {:<7} {:<40}",
                truncate(&record.host, 32),
                status,
                truncate(&describe(record), 40)
            );
        }
    }

    println!("{:-<80}", "");
    if doc.probe_status == ProbeStatus::Completed {
        println!("  Live hosts: {}/{}", doc.probe_records.len(), doc.hosts.len());
    }
    println!("  Updated: {} ago", format_duration(age));
}

fn describe(record: &subdex_common::ProbeRecord) -> String {
    let mut display = record.title.clone().unwrap_or_default();
    if !record.technologies.is_empty() {
        if !display.is_empty() {
            display.push(' ');
        }
        display.push_str(&format!("[{}]", record.technologies.join(", ")));
    }
    display
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let head: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

/// Format duration in a human-readable way
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs == 0 {
        format!("{}ms", millis)
    } else if total_secs < 60 {
        if millis > 0 {
            format!("{}.{:03}s", total_secs, millis)
        } else {
            format!("{}s", total_secs)
        }
    } else {
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    }
}
