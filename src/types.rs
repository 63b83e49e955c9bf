use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use futures_util::Stream;
use std::fmt;
use std::io;
use std::pin::Pin;

/// A discovered peer. Two values describe the same logical peer iff their
/// fingerprints are equal; no identity is kept across directory fetches.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub name: String,
    pub address: String,
    pub host_name: String,
    pub host_address: String,
}

impl Endpoint {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        host_name: impl Into<String>,
        host_address: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            host_name: host_name.into(),
            host_address: host_address.into(),
        }
    }

    /// Content key of the identity tuple: its compact JSON encoding.
    pub fn fingerprint(&self) -> Fingerprint {
        // Serializing four owned strings cannot fail.
        let encoded = serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{}|{}|{}|{}",
                self.name, self.address, self.host_name, self.host_address
            )
        });
        Fingerprint(encoded)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One output line of a running probe, emitted exactly once to the sink.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeRecord {
    pub source: Endpoint,
    pub destination: Endpoint,
    pub message: String,
    pub elapsed_ms: f64,
    pub success: bool,
    pub observed_at: DateTime<Utc>,
}

pub type GenericBoxedStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// Line-oriented output of a launched process.
pub type LineStream = GenericBoxedStream<io::Result<String>>;
