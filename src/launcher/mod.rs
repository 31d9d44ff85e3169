//! Provisioning of isolated worker instances from strategy images.
//!
//! The engine never spawns anything itself: a [`Launcher`] turns an image reference into an
//! [`Instance`] exposing a writable input stream, a readable output stream and a way to
//! force it to stop. [`ProcessLauncher`] is the bundled implementation.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

mod process;
#[cfg(test)]
pub(crate) mod scripted;

pub use process::ProcessLauncher;

/// Starts worker instances.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Start a fresh instance of `image`, named `instance_name`.
    ///
    /// Instance names are unique among running instances. An instance is never restarted or
    /// reused once stopped.
    async fn start(&self, image: &str, instance_name: &str) -> anyhow::Result<Box<dyn Instance>>;
}

/// A running worker.
#[async_trait]
pub trait Instance: Send {
    /// Name given at start.
    fn name(&self) -> &str;

    /// Stream read by the worker, one line per turn.
    fn input(&mut self) -> &mut (dyn AsyncWrite + Send + Unpin);

    /// Stream written by the worker. Handed out once, `None` afterwards.
    fn take_output(&mut self) -> Option<Box<dyn AsyncRead + Send + Unpin>>;

    /// Stop the worker and release whatever it holds. Must be idempotent.
    async fn force_stop(&mut self) -> anyhow::Result<()>;
}
