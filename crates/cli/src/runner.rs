// runner.rs
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use subdex_common::{JobStatus, ProbeStatus, ResultDocument, Settings, Target, ToolBinary};
use subdex_orchestrator::{
    BatchConfig, JobRegistry, Orchestrator, Outcome, ProbeBatcher, ResultCache, Status,
};
use subdex_prober::HttpxProber;
use subdex_sources::{CertLogSource, SourceAggregator, ToolSource};
use subdex_storage::open_store;
use subdex_target_resolver::TargetResolver;

use crate::args::{Cli, Commands, RequestArgs};
use crate::output::{print_document, print_health, print_job, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run(cli: Cli) -> Result<()> {
    let settings = cli
        .overrides
        .apply(Settings::from_env().context("Invalid SUBDEX_* setting")?)?;
    let format = OutputFormat::parse(&cli.output);
    let orchestrator = build_orchestrator(&settings, &cli.cache).await?;

    match cli.command {
        Commands::Domain { name, request } => {
            let target = TargetResolver::domain(&name)?;
            run_request(&orchestrator, &target, request, format).await
        }
        Commands::Org { name, request } => {
            let target = TargetResolver::organization(&name)?;
            run_request(&orchestrator, &target, request, format).await
        }
        Commands::Probe { name, org, wait } => {
            let target = parse_target(&name, org)?;
            let ticket = orchestrator.trigger_probe(&target).await?;
            if wait {
                let doc = wait_for_result(&orchestrator, &target).await?;
                print_document(&doc, format)
            } else {
                print_job(&ticket.state, ticket.joined, format)?;
                drain(&orchestrator, &target).await
            }
        }
        Commands::Status { name, org } => {
            let target = parse_target(&name, org)?;
            match orchestrator.get_status(&target).await? {
                Status::Job(state) => print_job(&state, false, format),
                Status::Document(doc) => print_document(&doc, format),
                Status::NotFound => bail!("No result for {}", target),
            }
        }
        Commands::Invalidate { name, org } => {
            let target = parse_target(&name, org)?;
            orchestrator.invalidate(&target).await?;
            println!("Invalidated {}", target);
            Ok(())
        }
        Commands::Health => {
            let health = orchestrator.health().await;
            print_health(&health, format)?;
            if !health.is_healthy() {
                bail!("One or more components are unavailable");
            }
            Ok(())
        }
    }
}

/// Wire the collaborators together. Tool executables are resolved once here.
async fn build_orchestrator(settings: &Settings, cache_location: &str) -> Result<Orchestrator> {
    info!("Cache: {} (ttl {:?})", cache_location, settings.cache_ttl);
    info!(
        "Probe batches: {} hosts, {} at a time, {:?} timeout",
        settings.batch_size, settings.probe_concurrency, settings.batch_timeout
    );

    let enum_tool = ToolBinary::resolve(&settings.enum_tool);
    let probe_tool = ToolBinary::resolve(&settings.probe_tool_name);
    for tool in [&enum_tool, &probe_tool] {
        match tool.path() {
            Some(path) => debug!("Using {} at {}", tool.name(), path.display()),
            None => warn!("{} not found; it will contribute nothing", tool.name()),
        }
    }

    let cert_log = Arc::new(
        CertLogSource::new(settings.cert_log_url.clone(), settings.cert_timeout)
            .context("Failed to build certificate log client")?,
    );
    let mut aggregator =
        SourceAggregator::new(settings.org_domain_limit).with_org_resolver(cert_log.clone());
    aggregator.add_source(cert_log);
    aggregator.add_source(Arc::new(ToolSource::new(enum_tool, settings.tool_timeout)));

    let prober = HttpxProber::new(probe_tool).with_options(settings.probe_tool.clone());
    let batcher = ProbeBatcher::new(Arc::new(prober), BatchConfig::from(settings));

    let store = open_store(cache_location)
        .await
        .with_context(|| format!("Failed to open cache store '{}'", cache_location))?;

    Ok(Orchestrator::new(
        Arc::new(aggregator),
        Arc::new(batcher),
        ResultCache::new(store, settings.cache_ttl),
        JobRegistry::new(),
    ))
}

fn parse_target(name: &str, org: bool) -> Result<Target> {
    let target = if org {
        TargetResolver::organization(name)?
    } else {
        TargetResolver::domain(name)?
    };
    Ok(target)
}

async fn run_request(
    orchestrator: &Orchestrator,
    target: &Target,
    request: RequestArgs,
    format: OutputFormat,
) -> Result<()> {
    let outcome = orchestrator
        .enumerate_and_probe(target, !request.no_cache, request.probe)
        .await?;

    let in_flight = match &outcome {
        Outcome::Ready(doc) => doc.probe_status == ProbeStatus::Running,
        Outcome::Job(ticket) => ticket.state.status == JobStatus::Running,
    };
    if request.wait && in_flight {
        let doc = wait_for_result(orchestrator, target).await?;
        return print_document(&doc, format);
    }

    match &outcome {
        Outcome::Ready(doc) => print_document(doc, format)?,
        Outcome::Job(ticket) => print_job(&ticket.state, ticket.joined, format)?,
    }
    if in_flight {
        drain(orchestrator, target).await?;
    }
    Ok(())
}

/// Poll until the target's probe reaches a terminal state.
///
/// A document probed elsewhere that stops changing for longer than the
/// orchestrator's stall window ends the wait with an error.
async fn wait_for_result(orchestrator: &Orchestrator, target: &Target) -> Result<ResultDocument> {
    let mut last_progress = None;
    let mut last_write = None;
    let mut idle = Duration::ZERO;
    loop {
        match orchestrator.get_status(target).await? {
            Status::Job(state) => match state.status {
                JobStatus::Error => bail!(
                    "Job for {} failed: {}",
                    target,
                    state.error.unwrap_or_else(|| "unknown error".to_string())
                ),
                JobStatus::Completed => {
                    if let Some(doc) = state.result {
                        return Ok(doc);
                    }
                }
                JobStatus::Running => {
                    if last_progress != Some(state.progress) {
                        info!("{}: {:?} {}%", target, state.phase, state.progress);
                        last_progress = Some(state.progress);
                    }
                }
            },
            Status::Document(doc) if doc.probe_status != ProbeStatus::Running => return Ok(doc),
            // probing in another process
            Status::Document(doc) => {
                if last_write == Some(doc.updated_at) {
                    idle += POLL_INTERVAL;
                } else {
                    last_write = Some(doc.updated_at);
                    idle = Duration::ZERO;
                }
                if idle > orchestrator.stall_window() + POLL_INTERVAL {
                    bail!("Probe for {} stopped making progress", target);
                }
            }
            Status::NotFound => bail!("Result for {} disappeared while waiting", target),
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

// Jobs live in this process only; leaving early would abandon the probe.
async fn drain(orchestrator: &Orchestrator, target: &Target) -> Result<()> {
    info!("Probing {} in the background; waiting for it to finish", target);
    let doc = wait_for_result(orchestrator, target).await?;
    info!(
        "Probe for {} finished: {} ({} record(s))",
        target,
        doc.probe_status,
        doc.probe_records.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        assert_eq!(
            parse_target("https://WWW.Example.com/path", false).unwrap(),
            Target::Domain("www.example.com".into())
        );
        assert!(parse_target("acme  corp", true).unwrap().is_organization());
        assert!(parse_target("not a domain", false).is_err());
    }

    #[tokio::test]
    async fn test_memory_cache_orchestrator() {
        let settings = Settings {
            enum_tool: "subdex-test-missing-enum-tool".into(),
            probe_tool_name: "subdex-test-missing-probe-tool".into(),
            ..Settings::default()
        };
        let orchestrator = build_orchestrator(&settings, "memory").await.unwrap();

        let target = Target::Domain("example.com".into());
        assert!(matches!(
            orchestrator.get_status(&target).await.unwrap(),
            Status::NotFound
        ));

        let health = orchestrator.health().await;
        assert!(health.cache.is_ok());
        assert!(!health.is_healthy());
    }

    #[tokio::test]
    async fn test_wait_ends_on_abandoned_probe() {
        let settings = Settings {
            enum_tool: "subdex-test-missing-enum-tool".into(),
            probe_tool_name: "subdex-test-missing-probe-tool".into(),
            ..Settings::default()
        };
        let orchestrator = build_orchestrator(&settings, "memory").await.unwrap();

        let target = Target::Domain("example.com".into());
        let mut hosts = subdex_common::HostSet::new();
        hosts.insert("www.example.com");
        let mut doc = ResultDocument::new(target.clone(), hosts);
        doc.begin_probe(1);
        doc.updated_at = chrono::Utc::now() - chrono::Duration::days(1);
        orchestrator.cache().put(&doc).await.unwrap();

        let doc = wait_for_result(&orchestrator, &target).await.unwrap();
        assert_eq!(doc.probe_status, ProbeStatus::Error);
        assert_eq!(doc.probe_error.as_deref(), Some(subdex_orchestrator::PROBE_ABANDONED));
    }

    #[tokio::test]
    async fn test_unknown_cache_store() {
        assert!(build_orchestrator(&Settings::default(), "redis://localhost").await.is_err());
    }
}
