use std::collections::HashSet;

use crate::error::IdentityError;

/// Addresses bound to this host, used to find our own endpoint and to keep
/// us from probing ourselves.
pub trait LocalIdentity: Send + Sync {
    fn current_addresses(&self) -> Result<HashSet<String>, IdentityError>;
}

/// Reads the addresses of every local interface, loopback included.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemIdentity;

impl LocalIdentity for SystemIdentity {
    fn current_addresses(&self) -> Result<HashSet<String>, IdentityError> {
        let interfaces = local_ip_address::list_afinet_netifas()?;
        Ok(interfaces
            .into_iter()
            .map(|(_, ip)| ip.to_string())
            .collect())
    }
}
