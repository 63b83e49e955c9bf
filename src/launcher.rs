use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time;
use tracing::{debug, info, warn};

use crate::error::LaunchError;
use crate::lines::line_stream;
use crate::types::LineStream;

/// Output of a launched program plus, for real processes, the handle that
/// owns the child.
pub struct Launched {
    pub lines: LineStream,
    pub process: Option<ProcessGuard>,
}

/// Starts external programs. Injected into the probe task and the kubectl
/// directory so tests can script their output.
pub trait Launcher: Send + Sync {
    fn launch(&self, program: &str, args: &[String]) -> Result<Launched, LaunchError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn launch(&self, program: &str, args: &[String]) -> Result<Launched, LaunchError> {
        info!("exec: {} {}", program, args.join(" "));
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LaunchError::MissingStdout(program.to_string()))?;

        Ok(Launched {
            lines: Box::pin(line_stream(stdout)),
            process: Some(ProcessGuard {
                program: program.to_string(),
                child,
            }),
        })
    }
}

/// Owns a spawned child. Dropping it kills the child.
pub struct ProcessGuard {
    program: String,
    child: Child,
}

impl ProcessGuard {
    /// OS pid of the child, until it has been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the child to exit on its own.
    pub async fn wait(mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Ask the child to stop, then kill it if it is still around after `grace`.
    pub async fn terminate(mut self, grace: Duration) {
        if let Ok(Some(status)) = self.child.try_wait() {
            debug!("{} already exited with {}", self.program, status);
            return;
        }

        #[cfg(unix)]
        if let Some(pid) = self.id() {
            // SAFETY: the pid belongs to our own child, which has not been reaped yet.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }

        match time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => debug!("{} exited with {}", self.program, status),
            Ok(Err(e)) => warn!("failed to wait for {}: {}", self.program, e),
            Err(_) => {
                warn!(
                    "{} did not exit within {:?}, killing it",
                    self.program, grace
                );
                if let Err(e) = self.child.kill().await {
                    warn!("failed to kill {}: {}", self.program, e);
                }
            }
        }
    }
}
