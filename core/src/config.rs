//! netwatch configuration: parsed from CLI flags or environment variables.

use std::time::Duration;

use clap::Parser;

/// default number of concurrent DNS resolver workers
pub const DEFAULT_DNS_WORKERS: usize = 8;
/// default interval, in minutes, between full re-resolution sweeps
pub const DEFAULT_DNS_LOOKUP_INTERVAL_MINS: u64 = 30;
/// default number of concurrent ping-sending workers
pub const DEFAULT_PING_WORKERS: usize = 16;
/// default size of the in-flight probe buffer
pub const DEFAULT_PING_BUFFER_SIZE: usize = 1024;
/// default interval, in seconds, between ping ticks
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 5;
/// default per-probe timeout, in milliseconds
pub const DEFAULT_PING_TIMEOUT_MILLIS: u64 = 1000;
/// default interval, in minutes, between purge sweeps
pub const DEFAULT_PURGE_INTERVAL_MINS: u64 = 60;
/// default retention window, in minutes, for purged measurements
pub const DEFAULT_PURGE_OLDER_THAN_MINS: u64 = 1440;
/// default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";
/// default log format ("standard" or "json")
pub const DEFAULT_LOG_FORMAT: &str = "standard";

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[clap(author, name = "netwatchd", bin_name = "netwatchd", about, long_about = None)]
/// parses from cli & environment var. netwatchd will load `.env` in the
/// same directory as the binary as well.
pub struct Config {
    /// number of concurrent DNS resolver workers
    #[clap(long, env, value_parser, default_value_t = DEFAULT_DNS_WORKERS)]
    pub dns_workers: usize,
    /// minutes between full device re-resolution sweeps
    #[clap(long, env, value_parser, default_value_t = DEFAULT_DNS_LOOKUP_INTERVAL_MINS)]
    pub dns_lookup_interval: u64,
    /// number of concurrent ping-sending workers
    #[clap(long, env, value_parser, default_value_t = DEFAULT_PING_WORKERS)]
    pub ping_workers: usize,
    /// size of the in-flight probe buffer
    #[clap(long, env, value_parser, default_value_t = DEFAULT_PING_BUFFER_SIZE)]
    pub ping_buffer_size: usize,
    /// seconds between ping ticks
    #[clap(long, env, value_parser, default_value_t = DEFAULT_PING_INTERVAL_SECS)]
    pub ping_interval: u64,
    /// milliseconds before an unanswered probe is considered a timeout
    #[clap(long, env, value_parser, default_value_t = DEFAULT_PING_TIMEOUT_MILLIS)]
    pub ping_timeout: u64,
    /// minutes between purge sweeps
    #[clap(long, env, value_parser, default_value_t = DEFAULT_PURGE_INTERVAL_MINS)]
    pub purge_interval: u64,
    /// minutes of retention before a measurement is eligible for purge
    #[clap(long, env, value_parser, default_value_t = DEFAULT_PURGE_OLDER_THAN_MINS)]
    pub purge_older_than: u64,
    /// record sink endpoint (a NATS server URL)
    #[clap(long, env, value_parser)]
    pub record_sink_endpoint: String,
    /// set the log level. All valid `tracing` `EnvFilter` directives are accepted
    #[clap(long, env, value_parser, default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,
    /// log as "json" or "standard" (unstructured)
    #[clap(long, env, value_parser, default_value = DEFAULT_LOG_FORMAT)]
    pub log_format: String,
}

impl Config {
    pub fn dns_lookup_interval(&self) -> Duration {
        Duration::from_secs(self.dns_lookup_interval * 60)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval * 60)
    }

    pub fn purge_older_than(&self) -> Duration {
        Duration::from_secs(self.purge_older_than * 60)
    }

    /// the record sink's auth secret. Read directly from the environment
    /// rather than through clap so it never shows up in `--help` or in a
    /// `Debug` dump of `Config`.
    pub fn record_sink_secret() -> anyhow::Result<String> {
        env_parser::parse_var_with_err("RECORD_SINK_SECRET", "")
    }
}
