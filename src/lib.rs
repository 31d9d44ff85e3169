//! # IPD Tournament
//!
//! A Rust crate running round-robin iterated prisoner's dilemma tournaments between strategies
//! executed as isolated worker processes.
//!
//! It provides:
//! - Tournament, round and match scheduling (`TournamentScheduler`, `RoundScheduler`,
//!   `MatchCoordinator`)
//! - The worker lifecycle and the line protocol with bounded-time reads (`StrategyWorker`)
//! - The payoff matrix (`payoff`)
//! - A SQLite record store and a process launcher, with optional memory limits enforced
//!   through Linux cgroups v2
//!
//! Every round pairs every strategy with every other one and with itself, and plays all the
//! matches of the round concurrently. Rounds are played one after another.
//!
//! # Documentation Overview
//!
//! - For the worker protocol and how misbehaving strategies are handled, see
//!   [`strategy_worker`].
//! - For configuring evaluation behavior, see
//!   [`Configuration`](crate::configuration::Configuration).
//! - For plugging another record store or launcher, see the [`RecordStore`](store::RecordStore)
//!   and [`Launcher`](launcher::Launcher) traits.
//! - For presenting results, see [`report`].
//!
//! # Usage Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ipd_tournament::prelude::*;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteStore::open("tournament.db")?);
//!     let tit_for_tat = store.create_strategy("Tit for Tat", "python3 tit_for_tat.py").await?;
//!     let grudger = store.create_strategy("Grudger", "./grudger").await?;
//!
//!     // Confine every worker to 100 MB, run them uncontained if cgroups are unavailable
//!     let config = Configuration::from_env()
//!         .with_worker_ram(100)
//!         .with_allow_uncontained(true)
//!         .with_turns(TurnsPolicy::Uniform { min: 150, max: 250 });
//!     let ctx = Context::new(store.clone(), Arc::new(ProcessLauncher::new(config)), config);
//!
//!     let mut tournament =
//!         TournamentScheduler::create(&ctx, &[tit_for_tat.id, grudger.id], 5).await?;
//!     tournament.run().await?;
//!
//!     for standing in standings(store.as_ref(), tournament.tournament().id, None).await? {
//!         println!("{}: {}", standing.strategy.name, standing.score);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Example Strategy
//!
//! A strategy is any program reading the opponent's previous move on stdin and printing its own
//! move on stdout, one line per turn. Here is Tit for Tat:
//!
//! ```no_run
//! use std::io::{self, BufRead, Write};
//!
//! fn main() -> io::Result<()> {
//!     let mut stdout = io::stdout();
//!     // The first move is played without input
//!     writeln!(stdout, "C")?;
//!     stdout.flush()?;
//!     for line in io::stdin().lock().lines() {
//!         // Copy whatever the opponent played last
//!         let answer = if line?.trim() == "D" { "D" } else { "C" };
//!         writeln!(stdout, "{answer}")?;
//!         stdout.flush()?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Strategy Requirements
//!
//! - Output must be flushed after every move
//! - Each move must be printed within the configured move timeout (100 ms by default)
//! - Communication is line based:
//!  * Host -> Strategy : `C` or `D`, the opponent's previous move (nothing before the first turn)
//!  * Strategy -> Host : `C` or `D`, its own move
//! - A missing, late or invalid move counts as `C`
#![warn(missing_docs)]

pub use anyhow;
pub mod abort;
mod cgroup_manager;
pub mod configuration;
mod context;
pub mod error;
pub mod launcher;
mod logger;
pub mod match_coordinator;
pub mod payoff;
pub mod records;
pub mod report;
pub mod round_scheduler;
pub mod store;
pub mod strategy_worker;
mod tournament_scheduler;

pub use context::Context;
pub use error::{Error, Result};
pub use tournament_scheduler::TournamentScheduler;

/// Commonly used types and traits for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use ipd_tournament::prelude::*;
/// ```
///
/// Includes:
/// - [`Configuration`](crate::configuration::Configuration) and
///   [`TurnsPolicy`](crate::configuration::TurnsPolicy)
/// - [`Context`](crate::Context)
/// - [`TournamentScheduler`](crate::TournamentScheduler)
/// - the bundled [`SqliteStore`](crate::store::SqliteStore) and
///   [`ProcessLauncher`](crate::launcher::ProcessLauncher)
/// - the [`report`](crate::report) functions
pub mod prelude {
    pub use crate::configuration::{Configuration, TurnsPolicy};
    pub use crate::launcher::{Launcher, ProcessLauncher};
    pub use crate::payoff::Move;
    pub use crate::report::{match_history, pairing_results, standings};
    pub use crate::store::{RecordStore, SqliteStore};
    pub use crate::Context;
    pub use crate::TournamentScheduler;
}
