use thiserror::Error;

/// Membership source could not be queried or answered with garbage.
/// Transient: the pool skips the tick and tries again on the next one.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("membership source unavailable: {0}")]
    Unavailable(String),

    #[error("malformed pod list: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for DirectoryError {
    fn from(err: serde_json::Error) -> Self {
        DirectoryError::Malformed(err.to_string())
    }
}

impl From<LaunchError> for DirectoryError {
    fn from(err: LaunchError) -> Self {
        DirectoryError::Unavailable(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to enumerate local addresses: {0}")]
    AddressEnumeration(String),
}

impl From<local_ip_address::Error> for IdentityError {
    fn from(err: local_ip_address::Error) -> Self {
        IdentityError::AddressEnumeration(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} has no stdout pipe")]
    MissingStdout(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be at least 1 second, got {value}")]
    InvalidInterval { name: &'static str, value: u64 },

    #[error("channel capacity must be positive")]
    ZeroCapacity,

    #[error("{0} must not be empty")]
    Empty(&'static str),
}
