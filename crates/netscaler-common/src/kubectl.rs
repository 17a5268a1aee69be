//! kubectl execution bridge
//!
//! Every remote operation (exec, cp, get, describe, logs) is a `kubectl`
//! invocation carrying the same connection flags the user passed to the
//! plugin. The child's stdout and stderr share one pipe, so the captured
//! text reads exactly as it would on a terminal. Long commands such as a
//! support bundle print a dot to stderr every couple of seconds while they
//! run.

use std::io::{Read, Write};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use crate::connection::ConnectionFlags;
use crate::{Error, Result};

/// Interval between progress dots
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// Default binary name
pub const KUBECTL: &str = "kubectl";

/// Result of a command that ran to completion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when terminated by a signal
    pub code: Option<i32>,
    /// Whether the command exited successfully
    pub success: bool,
    /// Merged stdout and stderr, lossily decoded
    pub output: String,
}

impl CommandOutput {
    /// Successful output with the given text
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            success: true,
            output: output.into(),
        }
    }

    /// Failed output with the given exit code and text
    pub fn failed(code: i32, output: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            success: false,
            output: output.into(),
        }
    }
}

/// Runs external programs.
///
/// A non-zero exit is not an error at this level; [`Kubectl`] decides what
/// to do with it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and capture its merged output
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

/// [`CommandRunner`] that spawns real processes.
#[derive(Clone, Debug)]
pub struct ProcessRunner {
    progress_interval: Option<Duration>,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    /// Runner that prints progress dots every [`PROGRESS_INTERVAL`]
    pub fn new() -> Self {
        Self {
            progress_interval: Some(PROGRESS_INTERVAL),
        }
    }

    /// Runner without a progress indicator
    pub fn quiet() -> Self {
        Self {
            progress_interval: None,
        }
    }

    /// Runner with a custom progress interval; zero disables progress
    pub fn with_progress_interval(interval: Duration) -> Self {
        Self {
            progress_interval: (!interval.is_zero()).then_some(interval),
        }
    }
}

/// Periodic `.` printer, stopped through its cancellation guard.
struct Progress {
    guard: DropGuard,
    handle: JoinHandle<()>,
}

impl Progress {
    fn start(period: Duration) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // first tick completes immediately
            ticker.tick().await;
            let mut printed = false;
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        let mut stderr = std::io::stderr();
                        let _ = stderr.write_all(b".");
                        let _ = stderr.flush();
                        printed = true;
                    }
                }
            }
            if printed {
                let _ = std::io::stderr().write_all(b"\n");
            }
        });
        Self {
            guard: token.drop_guard(),
            handle,
        }
    }

    async fn stop(self) {
        drop(self.guard);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Progress task failed");
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let spawn_error = |source: std::io::Error| Error::Spawn {
            program: program.to_string(),
            source,
        };

        let (mut reader, writer) = std::io::pipe().map_err(spawn_error)?;
        let mut child = {
            let stderr = writer.try_clone().map_err(spawn_error)?;
            let mut command = Command::new(program);
            command
                .args(args)
                .stdin(Stdio::null())
                .stdout(writer)
                .stderr(stderr)
                .kill_on_drop(true);
            // parent copies of the write end close when `command` drops
            command.spawn().map_err(spawn_error)?
        };
        debug!(program, ?args, "Spawned command");

        let copy = tokio::task::spawn_blocking(move || {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).map(|_| buf)
        });
        let progress = self.progress_interval.map(Progress::start);

        let status = child.wait().await;
        if status.is_err() {
            let _ = child.start_kill();
        }
        let copied = copy.await;
        if let Some(progress) = progress {
            progress.stop().await;
        }

        let capture_error = |source: std::io::Error| Error::Capture {
            program: program.to_string(),
            source,
        };
        let status = status.map_err(capture_error)?;
        let bytes = copied
            .map_err(|e| capture_error(std::io::Error::other(e)))?
            .map_err(capture_error)?;

        Ok(CommandOutput {
            code: status.code(),
            success: status.success(),
            output: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

fn pod_identity(pod: &Pod) -> Result<(&str, &str)> {
    let name = pod
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::config("pod has no name"))?;
    let namespace = pod
        .metadata
        .namespace
        .as_deref()
        .ok_or_else(|| Error::config(format!("pod {} has no namespace", name)))?;
    Ok((name, namespace))
}

/// `kubectl` with the user's connection flags baked in.
#[derive(Clone)]
pub struct Kubectl {
    program: String,
    connection_args: Vec<String>,
    runner: Arc<dyn CommandRunner>,
}

impl Kubectl {
    /// Build from the plugin's connection flags
    pub fn new(connection: &ConnectionFlags, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            program: KUBECTL.to_string(),
            connection_args: connection.to_kubectl_args(),
            runner,
        }
    }

    /// Use a different kubectl binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// `kubectl <connection flags> <args>`; a non-zero exit is
    /// [`Error::CommandExit`] carrying whatever was printed.
    pub async fn run<S: AsRef<str>>(&self, args: &[S]) -> Result<String> {
        let argv: Vec<String> = self
            .connection_args
            .iter()
            .cloned()
            .chain(args.iter().map(|a| a.as_ref().to_string()))
            .collect();

        let out = self.runner.run(&self.program, &argv).await?;
        if !out.success {
            debug!(program = %self.program, args = ?argv, code = ?out.code, "Command failed");
            return Err(Error::CommandExit {
                program: self.program.clone(),
                code: out.code,
                output: out.output,
            });
        }
        Ok(out.output)
    }

    /// `kubectl <connection flags> -n <namespace> <args>`
    pub async fn run_in_namespace<S: AsRef<str>>(
        &self,
        namespace: &str,
        args: &[S],
    ) -> Result<String> {
        let argv: Vec<&str> = ["-n", namespace]
            .into_iter()
            .chain(args.iter().map(|a| a.as_ref()))
            .collect();
        self.run(&argv).await
    }

    /// Run `command` inside `pod`, in `container` or the pod's default one.
    pub async fn exec(&self, pod: &Pod, container: Option<&str>, command: &[&str]) -> Result<String> {
        let (name, namespace) = pod_identity(pod)?;
        let mut argv = vec!["exec", "-n", namespace, name];
        if let Some(container) = container {
            argv.extend(["-c", container]);
        }
        argv.push("--");
        argv.extend_from_slice(command);
        self.run(&argv).await
    }

    /// Copy `remote` out of `pod` to the local path `local`.
    pub async fn copy_from(
        &self,
        pod: &Pod,
        container: Option<&str>,
        remote: &str,
        local: &Path,
    ) -> Result<String> {
        let (name, namespace) = pod_identity(pod)?;
        let source = format!("{}:{}", name, remote);
        let target = local.to_string_lossy();
        let mut argv = vec!["cp", "-n", namespace];
        if let Some(container) = container {
            argv.extend(["-c", container]);
        }
        argv.extend([source.as_str(), &*target]);
        self.run(&argv).await
    }
}
