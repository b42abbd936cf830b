use log::warn;
use once_cell::sync::OnceCell;
use serde_derive::Deserialize;
use std::sync::Mutex;

static INSTANCE: OnceCell<Mutex<RuntimeConfig>> = OnceCell::new();

pub fn instance() -> &'static Mutex<RuntimeConfig> {
    INSTANCE.get_or_init(|| Mutex::new(RuntimeConfig::new()))
}

/// Interceptor configuration, fixed for the process lifetime.
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// Switch the whole metric schema to the legacy naming and semantics.
    /// Supersedes `enable_handling_time_histogram` for latency recording.
    #[serde(default)]
    pub legacy: bool,
    /// Emit latency observations for non-streaming calls in the default
    /// schema. No effect when `legacy` is set.
    #[serde(default)]
    pub enable_handling_time_histogram: bool,
    /// Bind address of the Prometheus exposition endpoint.
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

fn default_metrics_addr() -> String {
    "0.0.0.0:4010".to_string()
}

impl RuntimeConfig {
    pub fn new() -> Self {
        RuntimeConfig {
            legacy: false,
            enable_handling_time_histogram: false,
            metrics_addr: default_metrics_addr(),
        }
    }

    pub fn from_toml(path: &str) -> Option<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(
                    "Something went wrong reading the runtime config file, {:?}",
                    e
                );
                return Some(RuntimeConfig::new());
            }
        };
        let config: RuntimeConfig = match toml::from_str(&contents) {
            Ok(c) => c,
            Err(e) => {
                warn!(
                    "Something went wrong reading the runtime config file, {:?}",
                    e
                );
                return Some(RuntimeConfig::new());
            }
        };
        *instance().lock().unwrap() = config.clone();
        Some(config)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}
