use serde::Deserialize;

/// Root application configuration. Loaded from an optional config file and
/// environment variables with the prefix `OUTREACH_EXPRESS__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub sequences: SequenceDefaults,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            scheduler: SchedulerConfig::default(),
            sequences: SequenceDefaults::default(),
        }
    }
}

// ─── Scheduler Config ───────────────────────────────────────────────────

/// Background runner that scans due executions and hands them to the dispatcher.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_scheduler_enabled() -> bool { true }
fn default_poll_interval_ms() -> u64 { 5_000 }
fn default_dispatch_timeout_ms() -> u64 { 10_000 }
fn default_batch_size() -> usize { 500 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            poll_interval_ms: default_poll_interval_ms(),
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
            batch_size: default_batch_size(),
        }
    }
}

// ─── Sequence Defaults ──────────────────────────────────────────────────

/// Settings applied to sequence definitions that omit their own.
#[derive(Debug, Clone, Deserialize)]
pub struct SequenceDefaults {
    #[serde(default = "default_start_hour")]
    pub default_start_hour: u32,
    #[serde(default = "default_end_hour")]
    pub default_end_hour: u32,
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
    #[serde(default = "default_true")]
    pub default_skip_weekends: bool,
    #[serde(default = "default_true")]
    pub default_stop_on_reply: bool,
    #[serde(default = "default_true")]
    pub default_stop_on_meeting: bool,
    #[serde(default = "default_daily_limit")]
    pub default_daily_limit: u32,
}

fn default_start_hour() -> u32 { 9 }
fn default_end_hour() -> u32 { 17 }
fn default_timezone() -> String { "UTC".to_string() }
fn default_true() -> bool { true }
fn default_daily_limit() -> u32 { 100 }

impl Default for SequenceDefaults {
    fn default() -> Self {
        Self {
            default_start_hour: default_start_hour(),
            default_end_hour: default_end_hour(),
            default_timezone: default_timezone(),
            default_skip_weekends: default_true(),
            default_stop_on_reply: default_true(),
            default_stop_on_meeting: default_true(),
            default_daily_limit: default_daily_limit(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and an optional config file.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("OUTREACH_EXPRESS")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
