use crate::error::ConfigError;
use std::time::Duration;

/// Phase a pod must report to be worth probing.
pub const READY_PHASE: &str = "Running";

/// Which pods of the membership source form the cohort.
#[derive(Clone, Debug)]
pub struct EndpointFilter {
    pub namespace: String,
    pub name_prefix: String,
}

impl EndpointFilter {
    pub fn new(namespace: impl Into<String>, name_prefix: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name_prefix: name_prefix.into(),
        }
    }

    /// Case-insensitive name prefix match plus the readiness predicate.
    pub fn matches(&self, name: &str, phase: &str) -> bool {
        let name_matches = name
            .to_uppercase()
            .starts_with(&self.name_prefix.to_uppercase());
        name_matches && phase == READY_PHASE
    }
}

/// Plain values consumed by the pool, built from the command line in `main`.
#[derive(Clone, Debug)]
pub struct Settings {
    pub filter: EndpointFilter,
    pub refresh_interval: Duration,
    pub ping_interval_secs: u64,
    pub ping_path: String,
    pub channel_capacity: usize,
    pub stop_grace: Duration,
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval < Duration::from_secs(1) {
            return Err(ConfigError::InvalidInterval {
                name: "update-config-interval-sec",
                value: self.refresh_interval.as_secs(),
            });
        }
        if self.ping_interval_secs == 0 {
            return Err(ConfigError::InvalidInterval {
                name: "ping-interval-sec",
                value: self.ping_interval_secs,
            });
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.ping_path.trim().is_empty() {
            return Err(ConfigError::Empty("ping-path"));
        }
        if self.filter.namespace.trim().is_empty() {
            return Err(ConfigError::Empty("namespace"));
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            filter: EndpointFilter::new("monitoring", "kubernetes-network-check"),
            refresh_interval: Duration::from_secs(30),
            ping_interval_secs: 1,
            ping_path: "/bin/ping".to_string(),
            channel_capacity: 1024,
            stop_grace: Duration::from_millis(2000),
        }
    }
}
