//! One continuous ping between a source and a destination endpoint.
//!
//! Every non-empty output line of the ping process becomes one [`ProbeRecord`]
//! on the shared channel, in the order the process printed them.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::launcher::Launcher;
use crate::select_or_cancel::select_next_or_cancel;
use crate::types::{Endpoint, ProbeRecord};

static ELAPSED_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time=(?P<elapsed>[-+]?[0-9]*\.?[0-9]+)\s*ms\b")
        .expect("elapsed regex is a compile-time constant and always valid")
});

/// Present only in lines reporting an echo reply.
const REPLY_MARKER: &str = "bytes from";

/// Extract `(elapsed_ms, success)` from one line of ping output.
///
/// Lines without a `time=<n> ms` token report 0 ms; lines without a reply
/// marker are failures (timeouts, unreachable, banners).
pub fn parse_line(text: &str) -> (f64, bool) {
    let elapsed = ELAPSED_REGEX
        .captures(text)
        .and_then(|caps| caps.name("elapsed"))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0);
    (elapsed, text.contains(REPLY_MARKER))
}

pub struct ProbeTask {
    pub source: Endpoint,
    pub destination: Endpoint,
    pub ping_path: String,
    pub interval_secs: u64,
    pub stop_grace: Duration,
}

impl ProbeTask {
    pub fn args(&self) -> Vec<String> {
        vec![
            "-i".to_string(),
            self.interval_secs.to_string(),
            self.destination.address.clone(),
        ]
    }

    /// Spawn the worker. It runs until `cancel` fires or the ping output ends.
    pub fn start(
        self,
        launcher: Arc<dyn Launcher>,
        sink: mpsc::Sender<ProbeRecord>,
        cancel: CancellationToken,
    ) -> ProbeHandle {
        let destination = self.destination.clone();
        let worker = tokio::spawn(self.run(launcher, sink, cancel.clone()));
        ProbeHandle {
            destination,
            cancel,
            worker,
        }
    }

    fn record(&self, message: String) -> ProbeRecord {
        let (elapsed_ms, success) = parse_line(&message);
        ProbeRecord {
            source: self.source.clone(),
            destination: self.destination.clone(),
            message,
            elapsed_ms,
            success,
            observed_at: Utc::now(),
        }
    }

    async fn run(
        self,
        launcher: Arc<dyn Launcher>,
        sink: mpsc::Sender<ProbeRecord>,
        cancel: CancellationToken,
    ) {
        let name = self.destination.name.clone();
        let mut launched = match launcher.launch(&self.ping_path, &self.args()) {
            Ok(launched) => launched,
            Err(e) => {
                error!("pinger error for '{}': {}", name, e);
                return;
            }
        };
        info!("pinger for '{}' started", name);

        loop {
            let line = match select_next_or_cancel(&mut launched.lines, &cancel).await {
                Ok(Some(Ok(line))) => line,
                Ok(Some(Err(e))) => {
                    warn!("reading ping output for '{}' failed: {}", name, e);
                    break;
                }
                Ok(None) => {
                    warn!("ping output for '{}' ended", name);
                    break;
                }
                Err(()) => break,
            };
            if line.is_empty() {
                continue;
            }

            let record = self.record(line);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                sent = sink.send(record) => {
                    if sent.is_err() {
                        debug!("record channel closed, pinger for '{}' exiting", name);
                        break;
                    }
                }
            }
        }

        drop(launched.lines);
        if let Some(process) = launched.process {
            process.terminate(self.stop_grace).await;
        }
        info!("pinger for '{}' finished", name);
    }
}

/// The pool's handle on a running probe.
pub struct ProbeHandle {
    destination: Endpoint,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

impl ProbeHandle {
    pub fn destination(&self) -> &Endpoint {
        &self.destination
    }

    /// Signal the worker to stop. Calling it again has no further effect.
    pub fn stop(&self) {
        if !self.is_stopped() {
            debug!("stopping pinger for '{}'", self.destination.name);
            self.cancel.cancel();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The worker has exited, on request or on its own.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the worker (and its process) to be gone.
    pub async fn join(self) {
        if let Err(e) = self.worker.await {
            if !e.is_cancelled() {
                error!("pinger for '{}' panicked: {}", self.destination.name, e);
            }
        }
    }
}
