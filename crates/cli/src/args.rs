use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::time::Duration;

use subdex_common::Settings;

#[derive(Parser, Debug)]
#[command(name = "subdex")]
#[command(version)]
#[command(about = "Subdomain enumeration and HTTP probing with a shared result cache", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Cache store: "memory" or a sqlite URL such as sqlite://subdex.db
    #[arg(long, default_value = "sqlite://subdex.db", global = true)]
    pub cache: String,

    /// Serve Prometheus metrics on this address, e.g. 127.0.0.1:9000
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,

    /// Output format: text, json
    #[arg(short, long, default_value = "text", global = true, value_parser = ["text", "json"])]
    pub output: String,

    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Enumerate subdomains of a domain
    Domain {
        /// Domain or URL, e.g. example.com or https://example.com/login
        name: String,

        #[command(flatten)]
        request: RequestArgs,
    },

    /// Enumerate the root domains of an organization and their subdomains
    Org {
        /// Organization name as it appears in certificate subjects
        name: String,

        #[command(flatten)]
        request: RequestArgs,
    },

    /// Probe the cached hosts of a target without enumerating again
    Probe {
        name: String,

        /// Treat NAME as an organization
        #[arg(long)]
        org: bool,

        /// Block until probing finishes and print the final result
        #[arg(long)]
        wait: bool,
    },

    /// Show the job or cached result for a target
    Status {
        name: String,

        #[arg(long)]
        org: bool,
    },

    /// Drop the cached result for a target
    Invalidate {
        name: String,

        #[arg(long)]
        org: bool,
    },

    /// Check the cache store and external tools
    Health,
}

#[derive(Args, Debug, Clone, Copy)]
pub struct RequestArgs {
    /// Ignore any cached result and enumerate again
    #[arg(long)]
    pub no_cache: bool,

    /// Probe the discovered hosts after enumeration
    #[arg(long)]
    pub probe: bool,

    /// Block until probing finishes and print the final result
    #[arg(long)]
    pub wait: bool,
}

/// Command-line overrides; these win over `SUBDEX_*` variables.
#[derive(Args, Debug, Default, Clone)]
pub struct Overrides {
    /// Hosts per probe batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Probe batches run at once
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Wall-clock limit per probe batch, in seconds
    #[arg(long)]
    pub batch_timeout: Option<u64>,

    /// Certificate log lookup timeout, in seconds
    #[arg(long)]
    pub cert_timeout: Option<u64>,

    /// Enumeration tool timeout, in seconds
    #[arg(long)]
    pub tool_timeout: Option<u64>,

    /// Cache entry lifetime, in seconds
    #[arg(long)]
    pub cache_ttl: Option<u64>,

    /// Most root domains an organization expands to
    #[arg(long)]
    pub org_limit: Option<usize>,

    /// Enumeration tool executable (name on PATH or a path)
    #[arg(long)]
    pub enum_tool: Option<String>,

    /// Probing tool executable (name on PATH or a path)
    #[arg(long)]
    pub probe_tool: Option<String>,

    /// Certificate log endpoint
    #[arg(long)]
    pub cert_log_url: Option<String>,
}

impl Overrides {
    pub fn apply(&self, mut settings: Settings) -> Result<Settings> {
        if let Some(v) = self.batch_size {
            settings.batch_size = v;
        }
        if let Some(v) = self.concurrency {
            settings.probe_concurrency = v;
        }
        if let Some(v) = self.batch_timeout {
            settings.batch_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.cert_timeout {
            settings.cert_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.tool_timeout {
            settings.tool_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.cache_ttl {
            settings.cache_ttl = Duration::from_secs(v);
        }
        if let Some(v) = self.org_limit {
            settings.org_domain_limit = v;
        }
        if let Some(v) = &self.enum_tool {
            settings.enum_tool = v.clone();
        }
        if let Some(v) = &self.probe_tool {
            settings.probe_tool_name = v.clone();
        }
        if let Some(v) = &self.cert_log_url {
            settings.cert_log_url = v.clone();
        }
        Ok(settings.validated()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_domain_request() {
        let cli = Cli::try_parse_from([
            "subdex", "-vv", "--cache", "memory", "domain", "example.com", "--probe", "--wait",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.cache, "memory");
        match cli.command {
            Commands::Domain { name, request } => {
                assert_eq!(name, "example.com");
                assert!(request.probe && request.wait && !request.no_cache);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["subdex", "status", "acme", "--org", "-o", "json"]).unwrap();
        assert_eq!(cli.output, "json");
        assert!(matches!(cli.command, Commands::Status { org: true, .. }));
    }

    #[test]
    fn rejects_unknown_output_format() {
        assert!(Cli::try_parse_from(["subdex", "-o", "xml", "health"]).is_err());
    }

    #[test]
    fn overrides_win_and_are_validated() {
        let overrides = Overrides {
            batch_size: Some(50),
            batch_timeout: Some(60),
            enum_tool: Some("/opt/bin/subfinder".into()),
            ..Overrides::default()
        };
        let settings = overrides.apply(Settings::default()).unwrap();
        assert_eq!(settings.batch_size, 50);
        assert_eq!(settings.batch_timeout, Duration::from_secs(60));
        assert_eq!(settings.enum_tool, "/opt/bin/subfinder");

        let zero = Overrides {
            concurrency: Some(0),
            ..Overrides::default()
        };
        assert!(zero.apply(Settings::default()).is_err());
    }
}
