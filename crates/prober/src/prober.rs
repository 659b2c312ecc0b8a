//! External HTTP probing tool (httpx-compatible CLI)

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Write;
use std::time::Instant;
use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};

use subdex_common::{ProbeRecord, ProbeToolOptions, Prober, SubdexError, SubdexResult, ToolBinary};
use crate::records::parse_records;

/// Runs the probing tool against a temporary host list file.
pub struct HttpxProber {
    binary: ToolBinary,
    options: ProbeToolOptions,
}

impl HttpxProber {
    /// Create a prober with default tool flags.
    pub fn new(binary: ToolBinary) -> Self {
        Self {
            binary,
            options: ProbeToolOptions::default(),
        }
    }

    /// Set the flags passed to the tool.
    pub fn with_options(mut self, options: ProbeToolOptions) -> Self {
        self.options = options;
        self
    }

    /// Command line for a given host list file.
    pub fn arguments(&self, host_file: &str) -> Vec<String> {
        vec![
            "-l".to_string(),
            host_file.to_string(),
            "-silent".to_string(),
            "-json".to_string(),
            "-tech-detect".to_string(),
            "-status-code".to_string(),
            "-title".to_string(),
            "-content-length".to_string(),
            "-timeout".to_string(),
            self.options.host_timeout.as_secs().max(1).to_string(),
            "-rate-limit".to_string(),
            self.options.rate_limit.to_string(),
            "-threads".to_string(),
            self.options.threads.to_string(),
            "-retries".to_string(),
            self.options.retries.to_string(),
        ]
    }

    fn write_host_file(hosts: &[String]) -> Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("subdex-hosts-")
            .suffix(".txt")
            .tempfile()
            .context("creating host list file")?;
        for host in hosts {
            writeln!(file, "{host}").context("writing host list file")?;
        }
        file.flush().context("flushing host list file")?;
        Ok(file)
    }
}

#[async_trait]
impl Prober for HttpxProber {
    fn name(&self) -> &str {
        self.binary.name()
    }

    #[instrument(skip(self, hosts), fields(hosts = hosts.len()))]
    async fn probe(&self, hosts: &[String]) -> SubdexResult<Vec<ProbeRecord>> {
        if hosts.is_empty() {
            return Ok(Vec::new());
        }

        // removed from disk when dropped, including on cancellation
        let host_file = Self::write_host_file(hosts)
            .map_err(|e| SubdexError::ProbeBatchFailure(format!("{e:#}")))?;
        let args = self.arguments(&host_file.path().to_string_lossy());

        let start = Instant::now();
        let output = self
            .binary
            .run(&args)
            .await
            .map_err(|e| SubdexError::ProbeBatchFailure(format!("{}: {e}", self.binary.name())))?;
        let records = parse_records(&output.stdout);
        debug!("{} record(s) in {:?}", records.len(), start.elapsed());

        if output.success {
            return Ok(records);
        }

        let cause = format!(
            "{} exited with {:?}: {}",
            self.binary.name(),
            output.code,
            output.stderr.lines().last().unwrap_or("").trim()
        );
        if records.is_empty() {
            Err(SubdexError::ProbeBatchFailure(cause))
        } else {
            warn!("{}; keeping {} partial record(s)", cause, records.len());
            Ok(records)
        }
    }

    fn is_available(&self) -> bool {
        self.binary.is_available()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;
    use tempfile::TempDir;

    fn script(body: &str) -> (TempDir, ToolBinary) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake-httpx");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        (dir, ToolBinary::at("fake-httpx", path))
    }

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    // Echo one record per line of the file passed after -l.
    const ECHO_HOSTS: &str = r#"while read -r h; do printf '{"input":"%s","status_code":200}\n' "$h"; done < "$2""#;

    #[tokio::test]
    async fn probes_every_host_in_file() {
        let (_dir, bin) = script(ECHO_HOSTS);
        let prober = HttpxProber::new(bin);
        let records = prober.probe(&hosts(&["a.example.com", "b.example.com"])).await.unwrap();
        let got: Vec<_> = records.iter().map(|r| r.host.as_str()).collect();
        assert_eq!(got, vec!["a.example.com", "b.example.com"]);
    }

    #[tokio::test]
    async fn partial_output_survives_non_zero_exit() {
        let (_dir, bin) = script(r#"echo '{"input":"a.example.com"}'; echo 'garbage'; echo crashed >&2; exit 1"#);
        let records = HttpxProber::new(bin).probe(&hosts(&["a.example.com", "b.example.com"])).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn failure_without_output_is_batch_failure() {
        let (_dir, bin) = script("echo crashed >&2; exit 1");
        let err = HttpxProber::new(bin).probe(&hosts(&["a.example.com"])).await.unwrap_err();
        assert!(matches!(err, SubdexError::ProbeBatchFailure(_)));
        assert!(err.to_string().contains("crashed"));
    }

    #[test]
    fn passes_tool_flags() {
        let prober = HttpxProber::new(ToolBinary::resolve("httpx")).with_options(ProbeToolOptions {
            host_timeout: Duration::from_secs(7),
            rate_limit: 20,
            threads: 5,
            retries: 0,
        });
        let args = prober.arguments("/tmp/h.txt");
        let joined = args.join(" ");
        assert!(joined.starts_with("-l /tmp/h.txt -silent -json"));
        assert!(joined.contains("-timeout 7 -rate-limit 20 -threads 5 -retries 0"));
    }
}
