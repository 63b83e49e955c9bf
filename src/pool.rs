//! The pinger pool: keeps exactly one probe running per peer in the cohort.
//!
//! Every tick it asks the directory who is out there, works out which of
//! those endpoints is this process, starts probes for peers it is not yet
//! probing and stops probes for peers that are gone. The probe map is owned
//! by the pool alone; workers only ever touch the record channel.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::directory::EndpointDirectory;
use crate::error::IdentityError;
use crate::identity::LocalIdentity;
use crate::launcher::Launcher;
use crate::probe::{ProbeHandle, ProbeTask};
use crate::types::{Endpoint, Fingerprint, ProbeRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolState {
    Idle,
    FetchingEndpoints,
    Reconciling,
    Sleeping,
    ShuttingDown,
    Stopped,
}

/// What one reconciliation tick did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickReport {
    /// Nothing was changed.
    Skipped { reason: String },
    /// None of the fetched endpoints is us, so nothing was started.
    NotAddressable { stopped: usize },
    Converged {
        started: usize,
        stopped: usize,
        active: usize,
    },
}

pub struct PingerPool {
    directory: Arc<dyn EndpointDirectory>,
    identity: Arc<dyn LocalIdentity>,
    launcher: Arc<dyn Launcher>,
    settings: Settings,
    sink: mpsc::Sender<ProbeRecord>,
    shutdown_token: CancellationToken,
    probes: HashMap<Fingerprint, ProbeHandle>,
    /// Stopped probes whose workers may still be terminating their process.
    retired: Vec<ProbeHandle>,
    state: PoolState,
}

impl PingerPool {
    pub fn new(
        directory: Arc<dyn EndpointDirectory>,
        identity: Arc<dyn LocalIdentity>,
        launcher: Arc<dyn Launcher>,
        settings: Settings,
        sink: mpsc::Sender<ProbeRecord>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            directory,
            identity,
            launcher,
            settings,
            sink,
            shutdown_token: shutdown,
            probes: HashMap::new(),
            retired: Vec::new(),
            state: PoolState::Idle,
        }
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    pub fn active_keys(&self) -> HashSet<Fingerprint> {
        self.probes.keys().cloned().collect()
    }

    pub fn active_destinations(&self) -> Vec<Endpoint> {
        let mut destinations: Vec<Endpoint> = self
            .probes
            .values()
            .map(|probe| probe.destination().clone())
            .collect();
        destinations.sort_by(|a, b| a.name.cmp(&b.name));
        destinations
    }

    /// Reconcile until the shutdown token fires, then stop every probe and
    /// wait for them. Dropping the pool afterwards closes the record channel.
    ///
    /// Fails only when the local addresses cannot be read at startup.
    pub async fn run(mut self) -> Result<(), IdentityError> {
        let mut used_ips: Vec<String> = self.identity.current_addresses()?.into_iter().collect();
        used_ips.sort();
        info!("used ips: {:?}", used_ips);

        let shutdown = self.shutdown_token.clone();
        while !shutdown.is_cancelled() {
            let report = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                report = self.reconcile_once() => report,
            };
            match report {
                TickReport::Skipped { reason } => warn!("reconciliation skipped: {}", reason),
                TickReport::NotAddressable { stopped } => {
                    warn!("no endpoint matches a local address yet, stopped {} pingers", stopped)
                }
                TickReport::Converged {
                    started,
                    stopped,
                    active,
                } => {
                    if started > 0 || stopped > 0 {
                        info!("pingers: {} started, {} stopped, {} active", started, stopped, active);
                        let names: Vec<String> = self
                            .active_destinations()
                            .into_iter()
                            .map(|destination| destination.name)
                            .collect();
                        debug!("probing {:?}", names);
                    } else {
                        debug!("pingers unchanged, {} active", active);
                    }
                }
            }

            self.state = PoolState::Sleeping;
            debug!("pool state {:?}", self.state());
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = time::sleep(self.settings.refresh_interval) => {}
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// One fetch-diff-converge cycle.
    pub async fn reconcile_once(&mut self) -> TickReport {
        self.state = PoolState::FetchingEndpoints;

        let local_addresses = match self.identity.current_addresses() {
            Ok(addresses) => addresses,
            Err(e) => {
                return TickReport::Skipped {
                    reason: e.to_string(),
                }
            }
        };
        let fetched = match self.directory.list(&self.settings.filter).await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                return TickReport::Skipped {
                    reason: e.to_string(),
                }
            }
        };
        debug!(
            "used pods: {:?}",
            fetched.iter().map(|e| e.name.as_str()).collect::<Vec<_>>()
        );

        self.state = PoolState::Reconciling;
        self.reap_finished();

        let source = fetched
            .iter()
            .find(|endpoint| local_addresses.contains(&endpoint.address))
            .cloned();

        // Later duplicates overwrite earlier ones.
        let desired: HashMap<Fingerprint, Endpoint> = fetched
            .into_iter()
            .filter(|endpoint| !local_addresses.contains(&endpoint.address))
            .map(|endpoint| (endpoint.fingerprint(), endpoint))
            .collect();

        let started = match &source {
            Some(source) => {
                debug!("current pod: {}", source.fingerprint().as_str());
                self.start_missing(source, &desired)
            }
            None => 0,
        };
        let stopped = self.stop_vanished(&desired);

        match source {
            Some(_) => TickReport::Converged {
                started,
                stopped,
                active: self.probes.len(),
            },
            None => TickReport::NotAddressable { stopped },
        }
    }

    /// Stop every probe and wait until all of them are gone.
    pub async fn shutdown(&mut self) {
        self.state = PoolState::ShuttingDown;
        info!("stopping {} pingers", self.probes.len());

        let mut handles: Vec<ProbeHandle> = self.probes.drain().map(|(_, probe)| probe).collect();
        handles.append(&mut self.retired);
        for probe in &handles {
            probe.stop();
        }
        futures_util::future::join_all(handles.into_iter().map(ProbeHandle::join)).await;

        self.state = PoolState::Stopped;
        info!("pinger pool stopped");
    }

    /// Forget retired workers that are done, and drop live entries whose
    /// worker exited on its own so the next start phase can replace them.
    fn reap_finished(&mut self) {
        self.retired.retain(|probe| !probe.is_finished());

        let exited: Vec<Fingerprint> = self
            .probes
            .iter()
            .filter(|(_, probe)| probe.is_finished())
            .map(|(key, _)| key.clone())
            .collect();
        for key in exited {
            if let Some(probe) = self.probes.remove(&key) {
                warn!("pinger for '{}' exited on its own", probe.destination().name);
            }
        }
    }

    fn start_missing(&mut self, source: &Endpoint, desired: &HashMap<Fingerprint, Endpoint>) -> usize {
        let mut started = 0;
        for (key, peer) in desired {
            if self.probes.contains_key(key) {
                continue;
            }
            let task = ProbeTask {
                source: source.clone(),
                destination: peer.clone(),
                ping_path: self.settings.ping_path.clone(),
                interval_secs: self.settings.ping_interval_secs,
                stop_grace: self.settings.stop_grace,
            };
            let handle = task.start(
                self.launcher.clone(),
                self.sink.clone(),
                self.shutdown_token.child_token(),
            );
            self.probes.insert(key.clone(), handle);
            started += 1;
        }
        started
    }

    fn stop_vanished(&mut self, desired: &HashMap<Fingerprint, Endpoint>) -> usize {
        let vanished: Vec<Fingerprint> = self
            .probes
            .keys()
            .filter(|key| !desired.contains_key(*key))
            .cloned()
            .collect();
        for key in &vanished {
            if let Some(probe) = self.probes.remove(key) {
                probe.stop();
                self.retired.push(probe);
            }
        }
        vanished.len()
    }
}
