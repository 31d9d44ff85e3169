//! Cancellation of running matches.

use tokio::sync::watch;

/// Raises the abort flag observed by every [`AbortSignal`] created from it.
#[derive(Debug)]
pub struct AbortHandle {
    flag: watch::Sender<bool>,
}

impl AbortHandle {
    /// A fresh handle and a first signal listening to it.
    pub fn new() -> (AbortHandle, AbortSignal) {
        let (flag, rx) = watch::channel(false);
        (AbortHandle { flag }, AbortSignal { rx })
    }

    /// Ask every listener to stop. Raising it twice is harmless.
    pub fn abort(&self) {
        self.flag.send_replace(true);
    }

    /// Another listener.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.flag.subscribe(),
        }
    }
}

/// Listener side of an [`AbortHandle`].
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    /// A signal that is never raised.
    pub fn never() -> AbortSignal {
        let (_, signal) = AbortHandle::new();
        signal
    }

    /// Whether the abort was requested.
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the abort is requested. Pends forever if the handle was dropped without
    /// aborting.
    pub async fn aborted(&mut self) {
        let raised = self.rx.wait_for(|aborted| *aborted).await.is_ok();
        if !raised {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn every_signal_sees_the_abort() {
        let (handle, mut first) = AbortHandle::new();
        let mut second = handle.signal();
        assert!(!first.is_aborted());
        handle.abort();
        handle.abort();
        first.aborted().await;
        second.aborted().await;
        assert!(second.clone().is_aborted());
    }

    #[tokio::test]
    async fn dropped_handle_never_aborts() {
        let mut signal = AbortSignal::never();
        assert!(!signal.is_aborted());
        assert!(timeout(Duration::from_millis(20), signal.aborted())
            .await
            .is_err());
    }
}
