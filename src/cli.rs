//! Command-line interface for callmeter
//!
//! Provides argument parsing and subcommand handling for the callmeter binary.

use clap::{Parser, Subcommand};

/// Metrics instrumentation for outbound HTTP calls
#[derive(Parser)]
#[command(name = "callmeter")]
#[command(version)]
#[command(about = "Metrics instrumentation for outbound HTTP calls")]
#[command(
    long_about = "callmeter wraps an HTTP client with call lifecycle metrics \
    and serves them as Prometheus text and as a flattened JSON snapshot."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Serve the metrics endpoints (default)
    Serve,

    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Send GET requests through the instrumented client and print the snapshot
    Probe {
        /// Target URL
        url: String,

        /// Number of requests to send
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# callmeter Configuration
# =======================
#
# This file configures the metrics server, meter naming, the instrumented
# HTTP client, and logging.

# ─────────────────────────────────────────────────────────────────────────────
# SERVER CONFIGURATION
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "127.0.0.1"

# Port serving /health, /metrics and /actuator/callmeter
port = 9464

# ─────────────────────────────────────────────────────────────────────────────
# METRICS
# ─────────────────────────────────────────────────────────────────────────────

[metrics]
# Prefix of every meter name (e.g. callmeter.calls.started)
prefix = "callmeter"

# Tag the per-request timer with the destination host
include_host_tag = true

# How the `uri` tag is derived from the request URL:
#   - "encoded_path": URL path only (low cardinality)
#   - "full_url": complete URL
#   - "top_private_domain": registrable domain of the host (example.co.uk)
url_mapper = "encoded_path"

# Request header names copied into per-request timer tags ("none" when absent)
request_tag_keys = []

# Percentiles published for every timer and byte summary
percentiles = [0.5, 0.75, 0.95, 0.98, 0.99, 0.999]

# Histogram bucket upper bounds for timers, in seconds
duration_buckets_seconds = [0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]

# Tags added to every meter
[metrics.extra_tags]
# service = "checkout"

# ─────────────────────────────────────────────────────────────────────────────
# HTTP CLIENT
# ─────────────────────────────────────────────────────────────────────────────

[client]
connect_timeout_seconds = 10
request_timeout_seconds = 30
pool_idle_timeout_seconds = 90
pool_max_idle_per_host = 5

# Dispatcher limits on concurrently executing calls
max_requests = 64
max_requests_per_host = 5

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error"
log_level = "info"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        // Clap's built-in verification for the CLI structure
        Cli::command().debug_assert();
    }

    #[test]
    fn default_config_path() {
        let cli = Cli::parse_from(["callmeter"]);
        assert_eq!(cli.config, "config.toml");
        assert!(cli.command.is_none());
    }

    #[test]
    fn custom_config_path() {
        let cli = Cli::parse_from(["callmeter", "--config", "custom.toml"]);
        assert_eq!(cli.config, "custom.toml");
    }

    #[test]
    fn serve_subcommand() {
        let cli = Cli::parse_from(["callmeter", "serve"]);
        assert!(matches!(cli.command, Some(Command::Serve)));
    }

    #[test]
    fn config_subcommand_with_output() {
        let cli = Cli::parse_from(["callmeter", "config", "-o", "my-config.toml"]);
        assert!(matches!(
            cli.command,
            Some(Command::Config { output: Some(ref path) }) if path == "my-config.toml"
        ));
    }

    #[test]
    fn probe_subcommand_defaults_to_one_request() {
        let cli = Cli::parse_from(["callmeter", "probe", "http://localhost:8080/ping"]);
        assert!(matches!(
            cli.command,
            Some(Command::Probe { ref url, count: 1 }) if url == "http://localhost:8080/ping"
        ));
    }

    #[test]
    fn probe_subcommand_with_count() {
        let cli = Cli::parse_from(["callmeter", "probe", "http://a.test/", "--count", "5"]);
        assert!(matches!(cli.command, Some(Command::Probe { count: 5, .. })));
    }

    #[test]
    fn probe_requires_url() {
        assert!(Cli::try_parse_from(["callmeter", "probe"]).is_err());
    }

    #[test]
    fn template_is_valid_config() {
        let template = generate_config_template();
        let config: Config = toml::from_str(template).expect("template should parse");
        config.validate().expect("template should validate");
        assert_eq!(config.server.port, 9464);
        assert_eq!(config.metrics.prefix, "callmeter");
        assert!(config.metrics.extra_tags.is_empty());
    }

    #[test]
    fn template_has_all_sections() {
        let template = generate_config_template();
        assert!(template.contains("[server]"));
        assert!(template.contains("[metrics]"));
        assert!(template.contains("[metrics.extra_tags]"));
        assert!(template.contains("[client]"));
        assert!(template.contains("[observability]"));
    }
}
