#[cfg(target_os = "linux")]
mod cgroup_manager_linux;

#[cfg(target_os = "linux")]
pub(crate) use cgroup_manager_linux::*;

#[cfg(not(target_os = "linux"))]
mod cgroup_manager_stub;

#[cfg(not(target_os = "linux"))]
pub(crate) use cgroup_manager_stub::*;

use std::{process::Stdio, time::Duration};

use anyhow::Context;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

fn create_process(command: &str, args: &[String], allow_stderr: bool) -> anyhow::Result<Child> {
    let mut cmd = Command::new(command);
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .kill_on_drop(true);
    if !allow_stderr {
        cmd.stderr(Stdio::null());
    }
    cmd.spawn()
        .with_context(|| format!("command '{command}' not found"))
}

/// A worker process with piped stdin/stdout, optionally confined in a [`Container`].
#[derive(Debug)]
pub(crate) struct LimitedProcess {
    name: String,
    child: Child,
    stdin: ChildStdin,
    stdout: Option<ChildStdout>,
    container: Option<Container>,
    cleaned_up: bool,
}

impl LimitedProcess {
    /// Time given to the processes of a container to disappear once killed.
    pub(crate) const CLEANUP_DURATION: Duration = Duration::from_secs(1);

    /// Spawn `command` inside a fresh container limited to `max_memory` bytes.
    pub(crate) async fn launch(
        name: &str,
        command: &str,
        args: &[String],
        max_memory: i64,
        allow_stderr: bool,
    ) -> anyhow::Result<LimitedProcess> {
        let container = Container::create(max_memory)
            .await
            .context("could not create container")?;
        let mut child = match create_process(command, args, allow_stderr) {
            Ok(child) => child,
            Err(e) => {
                container.delete();
                return Err(e);
            }
        };
        let added = match child.id() {
            Some(pid) => container.add(pid),
            None => Err(anyhow::anyhow!("process exited before joining its container")),
        };
        if let Err(e) = added {
            if let Err(kill) = child.kill().await {
                warn!("could not kill process {name} after failing to confine it: {kill}");
            }
            container.delete();
            return Err(e).context("could not create process in container");
        }
        Self::from_child(name, child, Some(container))
    }

    /// Spawn `command` as a plain child process.
    pub(crate) fn launch_without_container(
        name: &str,
        command: &str,
        args: &[String],
        allow_stderr: bool,
    ) -> anyhow::Result<LimitedProcess> {
        let child =
            create_process(command, args, allow_stderr).context("could not create process")?;
        Self::from_child(name, child, None)
    }

    fn from_child(
        name: &str,
        mut child: Child,
        container: Option<Container>,
    ) -> anyhow::Result<LimitedProcess> {
        let stdin = child.stdin.take().context("process stdin is not piped")?;
        let stdout = child.stdout.take().context("process stdout is not piped")?;
        debug!(pid = ?child.id(), contained = container.is_some(), "started {name}");
        Ok(LimitedProcess {
            name: name.to_string(),
            child,
            stdin,
            stdout: Some(stdout),
            container,
            cleaned_up: false,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn stdin(&mut self) -> &mut ChildStdin {
        &mut self.stdin
    }

    /// The output stream, handed out once.
    pub(crate) fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Kill the process (every process of the container if any) and remove the container.
    ///
    /// Calling it again after a success does nothing.
    pub(crate) async fn try_kill(&mut self, max_duration: Duration) -> anyhow::Result<()> {
        if self.cleaned_up {
            return Ok(());
        }
        match &self.container {
            Some(container) => {
                container
                    .kill(self.child.id(), max_duration)
                    .await
                    .context("could not kill container")?;
                // processes are gone, a leftover cgroup only costs a directory
                self.cleaned_up = true;
                container.delete();
                // reap the zombie
                match self.child.try_wait() {
                    Ok(Some(status)) => debug!("{} exited with {status}", self.name),
                    Ok(None) => debug!("{} not reaped yet", self.name),
                    Err(e) => debug!("could not reap {}: {e}", self.name),
                }
            }
            None => {
                if self
                    .child
                    .try_wait()
                    .context("could not poll process")?
                    .is_none()
                {
                    self.child.kill().await.context("could not kill process")?;
                }
                self.cleaned_up = true;
            }
        }
        Ok(())
    }
}

impl Drop for LimitedProcess {
    fn drop(&mut self) {
        if !self.cleaned_up {
            warn!(
                "Process {} was not cleaned up before dropping, killing it",
                self.name
            );
            // the child itself is killed by `kill_on_drop`
            if let Some(container) = &self.container {
                container.kill_now();
                container.delete();
            }
        }
    }
}
