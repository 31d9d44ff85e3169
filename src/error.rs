//! Failures that abort a match, a round or a tournament.
//!
//! Protocol misbehaviour of a strategy (timeouts, garbage output, ...) is never an [`Error`]:
//! it is reported as an [`Anomaly`](crate::strategy_worker::Anomaly) and the move defaults to
//! cooperation.

use crate::records::{RoundId, StrategyId};

/// Crate result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors propagated by the schedulers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The launcher could not start a worker instance.
    #[error("could not launch worker '{instance}' from image '{image}'")]
    Launch {
        /// Instance name requested from the launcher.
        instance: String,
        /// Strategy image reference.
        image: String,
        #[source]
        source: anyhow::Error,
    },

    /// A match could not be created (store failure or launch failure of one side).
    #[error("could not set up match {first} VS {second} in round {round_id}")]
    MatchSetup {
        /// Round the match belongs to.
        round_id: RoundId,
        /// Side A strategy.
        first: StrategyId,
        /// Side B strategy.
        second: StrategyId,
        #[source]
        source: Box<Error>,
    },

    /// A match failed while playing its turns.
    #[error("match {match_id} failed at turn {turn_number}")]
    MatchRun {
        /// Failed match.
        match_id: i64,
        /// Turn being played when the failure happened.
        turn_number: u32,
        #[source]
        source: Box<Error>,
    },

    /// One match of the round failed; the whole round was aborted.
    #[error("round {round_number} aborted")]
    Round {
        /// 0-based round number.
        round_number: u32,
        #[source]
        source: Box<Error>,
    },

    /// The record store refused a read or a write.
    #[error("record store failure")]
    Store(#[source] anyhow::Error),

    /// A strategy id does not exist in the record store.
    #[error("unknown strategy {0}")]
    UnknownStrategy(StrategyId),

    /// A tournament needs at least one strategy.
    #[error("a tournament needs at least one strategy")]
    NoStrategies,

    /// The match was stopped because a sibling match failed.
    #[error("cancelled")]
    Cancelled,

    /// A match task panicked or was aborted by the runtime.
    #[error("match task failed")]
    TaskFailed(#[from] tokio::task::JoinError),
}

impl Error {
    /// True when this error only reports a cancellation requested by the scheduler.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
