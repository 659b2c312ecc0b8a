//! Active enumeration tool source (subfinder-compatible CLI)

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

use subdex_common::{EnumerationSource, SubdexError, SubdexResult, ToolBinary};

/// Runs `<tool> -d <domain> -silent` and reads one hostname per stdout line.
pub struct ToolSource {
    binary: ToolBinary,
    timeout: Duration,
}

impl ToolSource {
    pub fn new(binary: ToolBinary, timeout: Duration) -> Self {
        Self { binary, timeout }
    }
}

#[async_trait]
impl EnumerationSource for ToolSource {
    fn name(&self) -> &str {
        self.binary.name()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    #[instrument(skip(self))]
    async fn discover(&self, domain: &str) -> SubdexResult<Vec<String>> {
        let output = self
            .binary
            .run(["-d", domain, "-silent"])
            .await
            .map_err(|e| SubdexError::source_failure(self.binary.name(), e))?;

        if !output.success {
            return Err(SubdexError::source_failure(
                self.binary.name(),
                format!(
                    "exit code {:?}: {}",
                    output.code,
                    output.stderr.lines().last().unwrap_or("").trim()
                ),
            ));
        }

        let hosts: Vec<String> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        debug!("{} line(s) from {}", hosts.len(), self.binary.name());
        Ok(hosts)
    }

    fn is_available(&self) -> bool {
        self.binary.is_available()
    }
}
