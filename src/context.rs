use std::sync::Arc;

use crate::{
    configuration::Configuration, launcher::Launcher, logger::init_logger, store::RecordStore,
};

/// Handles shared by every scheduler: where records go, how workers start and how they behave.
///
/// Cloning is cheap, both collaborators are reference counted.
#[derive(Clone)]
pub struct Context {
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) launcher: Arc<dyn Launcher>,
    pub(crate) config: Configuration,
}

impl Context {
    /// Bundle the collaborators.
    ///
    /// If `config` enables logging, a file logger is installed as the global `tracing`
    /// subscriber (see [`Configuration::with_log`]).
    pub fn new(
        store: Arc<dyn RecordStore>,
        launcher: Arc<dyn Launcher>,
        config: Configuration,
    ) -> Self {
        if config.log {
            if let Err(e) = init_logger() {
                eprintln!("could not start file logger: {e:#}");
            }
        }
        Context {
            store,
            launcher,
            config,
        }
    }

    /// The record store.
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// The worker launcher.
    pub fn launcher(&self) -> &Arc<dyn Launcher> {
        &self.launcher
    }

    /// Engine configuration.
    pub fn config(&self) -> &Configuration {
        &self.config
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        launcher::scripted::ScriptedLauncher, records::Strategy,
        store::testing::InstrumentedStore,
    };

    /// A context over an instrumented in-memory store and scripted strategies.
    pub(crate) struct Fixture {
        pub(crate) store: Arc<InstrumentedStore>,
        pub(crate) launcher: Arc<ScriptedLauncher>,
        pub(crate) ctx: Context,
        /// One strategy per image, named after it, in the given order.
        pub(crate) strategies: Vec<Strategy>,
    }

    impl Fixture {
        pub(crate) async fn new(
            store: InstrumentedStore,
            launcher: ScriptedLauncher,
            images: &[&str],
        ) -> Fixture {
            let store = Arc::new(store);
            let launcher = Arc::new(launcher);
            let mut strategies = vec![];
            for image in images {
                strategies.push(store.create_strategy(image, image).await.unwrap());
            }
            let config = Configuration::new().with_move_timeout(Duration::from_millis(50));
            let ctx = Context::new(store.clone(), launcher.clone(), config);
            Fixture {
                store,
                launcher,
                ctx,
                strategies,
            }
        }

        pub(crate) fn strategy(&self, image: &str) -> &Strategy {
            self.strategies
                .iter()
                .find(|s| s.image == image)
                .unwrap()
        }
    }
}
