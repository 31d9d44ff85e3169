use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use anyhow::{self, bail, Context};
use cgroups_rs::{cgroup_builder::CgroupBuilder, Cgroup, CgroupPid, MaxValue};
use tokio::time::{sleep, Instant};
use tracing::warn;

/// Maximum number of processes a worker may fork.
const MAX_PIDS: i64 = 100;

async fn get_current_user_id() -> anyhow::Result<String> {
    let output = tokio::process::Command::new("id")
        .arg("-u")
        .output()
        .await
        .context("Could not launch 'id -u'")?;
    let untrimed_id = std::str::from_utf8(&output.stdout).context("id is not a valid string")?;
    Ok(untrimed_id.trim().to_string())
}

fn get_cgroup_path(user_id: &str, group_name: &str) -> String {
    format!("user.slice/user-{user_id}.slice/user@{user_id}.service/{group_name}")
}

/// Create a cgroup at `path`.
///
/// * `max_memory` - Maximum available memory in Bytes. Non-positive means no restriction.
/// * `max_pids` - Maximum number of PIDS inside the cgroup at any time. Non-positive means no restriction.
fn create_cgroup(path: &str, max_memory: i64, max_pids: i64) -> anyhow::Result<Cgroup> {
    let mut builder = CgroupBuilder::new(path);
    if max_memory > 0 {
        builder = builder.memory().memory_hard_limit(max_memory).done();
    }
    if max_pids > 0 {
        builder = builder
            .pid()
            .maximum_number_of_processes(MaxValue::Value(max_pids))
            .done();
    }
    builder
        .build(cgroups_rs::hierarchies::auto())
        .context("could not create cgroup")
}

/// A cgroup v2 confining the processes of one worker.
#[derive(Debug)]
pub(crate) struct Container {
    cgroup: Cgroup,
}

impl Container {
    pub(crate) async fn create(max_memory: i64) -> anyhow::Result<Container> {
        static COUNTER: AtomicU32 = AtomicU32::new(1);
        let user_id = get_current_user_id()
            .await
            .context("could not get user id")?;
        // one cgroup per worker, unique across hosts sharing the user slice
        let group_name = format!(
            "IPD_WORKER_{}_{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let path = get_cgroup_path(&user_id, &group_name);
        let cgroup = create_cgroup(&path, max_memory, MAX_PIDS)?;
        Ok(Container { cgroup })
    }

    pub(crate) fn add(&self, pid: u32) -> anyhow::Result<()> {
        self.cgroup
            .add_task_by_tgid(CgroupPid { pid: pid.into() })
            .context("could not add process to cgroup")
    }

    /// Kill every member and wait until `pid` left the cgroup.
    pub(crate) async fn kill(&self, pid: Option<u32>, max_duration: Duration) -> anyhow::Result<()> {
        self.cgroup.kill().context("could not kill process")?;
        if let Some(pid) = pid {
            self.wait_for_process_cleanup(pid.into(), max_duration)
                .await?;
        }
        Ok(())
    }

    pub(crate) fn kill_now(&self) {
        if let Err(e) = self.cgroup.kill() {
            warn!("could not kill cgroup {}: {e}", self.cgroup.path());
        }
    }

    pub(crate) fn delete(&self) {
        if let Err(e) = self.cgroup.delete() {
            warn!("Failed to remove cgroup. If this happens a lot, it may slow down the computer. {e}");
        }
    }

    async fn wait_for_process_cleanup(&self, pid: u64, max_duration: Duration) -> anyhow::Result<()> {
        let deadline = Instant::now() + max_duration;
        while self.cgroup.tasks().iter().any(|cpid| cpid.pid == pid) {
            if Instant::now() > deadline {
                bail!("process cleanup timed out after {max_duration:?}");
            }
            sleep(std::cmp::min(Duration::from_millis(10), max_duration / 10)).await;
        }
        Ok(())
    }
}
