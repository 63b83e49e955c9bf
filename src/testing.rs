//! Scriptable collaborators for unit tests. All instrumentation is owned by
//! the individual double, so tests never share state.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_stream::stream;
use async_trait::async_trait;
use serde_json::json;

use crate::config::EndpointFilter;
use crate::directory::EndpointDirectory;
use crate::error::{DirectoryError, IdentityError, LaunchError};
use crate::identity::LocalIdentity;
use crate::launcher::{Launched, Launcher};
use crate::types::{Endpoint, LineStream};

/// Render a `kubectl get pods -o json` style document.
pub fn pod_list_json(pods: &[(&str, &str, &str, &str, &str)]) -> String {
    let items: Vec<_> = pods
        .iter()
        .map(|(name, pod_ip, node, host_ip, phase)| {
            json!({
                "metadata": { "name": name, "namespace": "monitoring" },
                "spec": { "nodeName": node },
                "status": { "phase": phase, "podIP": pod_ip, "hostIP": host_ip },
            })
        })
        .collect();
    serde_json::to_string_pretty(&json!({ "apiVersion": "v1", "kind": "List", "items": items }))
        .expect("static document")
}

pub fn endpoint(name: &str, address: &str) -> Endpoint {
    Endpoint::new(name, address, format!("node-{name}"), "192.168.0.1")
}

#[derive(Clone)]
enum Script {
    /// Lines, then end of stream.
    Finite(Vec<String>),
    /// Lines, then stay open like a running ping.
    Continuous(Vec<String>),
    Fail,
}

struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn new(live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self(live)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Launcher whose output is scripted per program or per target address
/// (the last argument). Unscripted launches stay open and silent.
#[derive(Default)]
pub struct ScriptedLauncher {
    by_program: Mutex<HashMap<String, Script>>,
    by_target: Mutex<HashMap<String, Script>>,
    launches: Mutex<Vec<(String, Vec<String>)>>,
    live: Arc<AtomicUsize>,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_program(&self, program: &str, lines: Vec<String>) {
        self.by_program
            .lock()
            .unwrap()
            .insert(program.to_string(), Script::Finite(lines));
    }

    /// Like `script_program`, but the output never ends.
    pub fn script_program_continuous(&self, program: &str, lines: &[&str]) {
        let lines = lines.iter().map(|line| line.to_string()).collect();
        self.by_program
            .lock()
            .unwrap()
            .insert(program.to_string(), Script::Continuous(lines));
    }

    pub fn fail_program(&self, program: &str) {
        self.by_program
            .lock()
            .unwrap()
            .insert(program.to_string(), Script::Fail);
    }

    pub fn script_target(&self, address: &str, lines: &[&str]) {
        let lines = lines.iter().map(|line| line.to_string()).collect();
        self.by_target
            .lock()
            .unwrap()
            .insert(address.to_string(), Script::Continuous(lines));
    }

    pub fn finish_target(&self, address: &str, lines: &[&str]) {
        let lines = lines.iter().map(|line| line.to_string()).collect();
        self.by_target
            .lock()
            .unwrap()
            .insert(address.to_string(), Script::Finite(lines));
    }

    pub fn fail_target(&self, address: &str) {
        self.by_target
            .lock()
            .unwrap()
            .insert(address.to_string(), Script::Fail);
    }

    pub fn launches(&self) -> Vec<(String, Vec<String>)> {
        self.launches.lock().unwrap().clone()
    }

    pub fn launches_for(&self, address: &str) -> usize {
        self.launches
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, args)| args.last().map(String::as_str) == Some(address))
            .count()
    }

    /// Output streams that have been launched and not yet dropped.
    pub fn live_streams(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl Launcher for ScriptedLauncher {
    fn launch(&self, program: &str, args: &[String]) -> Result<Launched, LaunchError> {
        self.launches
            .lock()
            .unwrap()
            .push((program.to_string(), args.to_vec()));

        let target = args.last().cloned().unwrap_or_default();
        let script = self
            .by_target
            .lock()
            .unwrap()
            .get(&target)
            .cloned()
            .or_else(|| self.by_program.lock().unwrap().get(program).cloned())
            .unwrap_or(Script::Continuous(Vec::new()));

        let (lines, hold_open) = match script {
            Script::Fail => {
                return Err(LaunchError::Spawn {
                    program: program.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted failure"),
                })
            }
            Script::Finite(lines) => (lines, false),
            Script::Continuous(lines) => (lines, true),
        };

        let guard = LiveGuard::new(self.live.clone());
        let lines: LineStream = Box::pin(stream! {
            let _guard = guard;
            for line in lines {
                yield Ok::<String, std::io::Error>(line);
            }
            if hold_open {
                futures_util::future::pending::<()>().await;
            }
        });

        Ok(Launched {
            lines,
            process: None,
        })
    }
}

/// Directory answering with whatever snapshot the test last set.
pub struct StaticDirectory {
    current: Mutex<Result<Vec<Endpoint>, String>>,
    hanging: AtomicBool,
    calls: AtomicUsize,
}

impl StaticDirectory {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self {
            current: Mutex::new(Ok(endpoints)),
            hanging: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, endpoints: Vec<Endpoint>) {
        *self.current.lock().unwrap() = Ok(endpoints);
    }

    pub fn set_unavailable(&self, reason: &str) {
        *self.current.lock().unwrap() = Err(reason.to_string());
    }

    /// Every later `list` call blocks forever.
    pub fn hang(&self) {
        self.hanging.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EndpointDirectory for StaticDirectory {
    async fn list(&self, _filter: &EndpointFilter) -> Result<Vec<Endpoint>, DirectoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hanging.load(Ordering::SeqCst) {
            futures_util::future::pending::<()>().await;
        }
        self.current
            .lock()
            .unwrap()
            .clone()
            .map_err(DirectoryError::Unavailable)
    }
}

pub struct StaticIdentity {
    addresses: Mutex<Result<HashSet<String>, String>>,
}

impl StaticIdentity {
    pub fn new(addresses: &[&str]) -> Self {
        Self {
            addresses: Mutex::new(Ok(addresses.iter().map(|a| a.to_string()).collect())),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            addresses: Mutex::new(Err(reason.to_string())),
        }
    }

    pub fn set(&self, addresses: &[&str]) {
        *self.addresses.lock().unwrap() = Ok(addresses.iter().map(|a| a.to_string()).collect());
    }

    pub fn fail(&self, reason: &str) {
        *self.addresses.lock().unwrap() = Err(reason.to_string());
    }
}

impl LocalIdentity for StaticIdentity {
    fn current_addresses(&self) -> Result<HashSet<String>, IdentityError> {
        self.addresses
            .lock()
            .unwrap()
            .clone()
            .map_err(IdentityError::AddressEnumeration)
    }
}
