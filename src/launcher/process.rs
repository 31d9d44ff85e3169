use anyhow::Context;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{instrument, warn};

use super::{Instance, Launcher};
use crate::{cgroup_manager::LimitedProcess, configuration::Configuration};

/// Launches images as local processes.
///
/// An image reference is a command line: the program followed by its whitespace separated
/// arguments (`"python3 strategies/tit_for_tat.py"`). When the configuration sets a worker
/// memory limit, every process is confined in its own cgroup. If the cgroup cannot be created
/// the start fails, unless uncontained workers are allowed.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    config: Configuration,
}

impl ProcessLauncher {
    /// Create a launcher using the containment settings of `config`.
    pub fn new(config: Configuration) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    #[instrument(skip(self))]
    async fn start(&self, image: &str, instance_name: &str) -> anyhow::Result<Box<dyn Instance>> {
        let mut parts = image.split_whitespace();
        let command = parts.next().context("empty image reference")?;
        let args = parts.map(str::to_string).collect::<Vec<_>>();
        let allow_stderr = self.config.debug_worker_stderr;

        let process = match self.config.worker_ram {
            Some(megabytes) => {
                let max_memory = i64::try_from(megabytes)
                    .unwrap_or(i64::MAX / (1024 * 1024))
                    .saturating_mul(1024 * 1024);
                match LimitedProcess::launch(instance_name, command, &args, max_memory, allow_stderr)
                    .await
                {
                    Ok(process) => process,
                    Err(e) if self.config.allow_uncontained => {
                        warn!("could not confine {instance_name}, running it uncontained: {e:#}");
                        LimitedProcess::launch_without_container(
                            instance_name,
                            command,
                            &args,
                            allow_stderr,
                        )?
                    }
                    Err(e) => return Err(e),
                }
            }
            None => {
                LimitedProcess::launch_without_container(instance_name, command, &args, allow_stderr)?
            }
        };
        Ok(Box::new(process))
    }
}

#[async_trait]
impl Instance for LimitedProcess {
    fn name(&self) -> &str {
        LimitedProcess::name(self)
    }

    fn input(&mut self) -> &mut (dyn AsyncWrite + Send + Unpin) {
        self.stdin()
    }

    fn take_output(&mut self) -> Option<Box<dyn AsyncRead + Send + Unpin>> {
        self.take_stdout()
            .map(|stdout| Box::new(stdout) as Box<dyn AsyncRead + Send + Unpin>)
    }

    async fn force_stop(&mut self) -> anyhow::Result<()> {
        self.try_kill(LimitedProcess::CLEANUP_DURATION).await
    }
}
