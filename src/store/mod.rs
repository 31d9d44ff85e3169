//! The record store keeping tournaments, rounds, matches and turns.
//!
//! The engine only talks to the store through [`RecordStore`], a handle to it is passed
//! explicitly to every scheduler. [`SqliteStore`] is the bundled implementation.
//!
//! Implementations must:
//! - enforce uniqueness of `(tournament, round_number)`, `(round, side A, side B)` and
//!   `(match, turn_number, side)`,
//! - have committed a row before returning from the call creating it,
//! - serialize concurrent commits themselves (the store is shared by every running match).

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::records::{
    Match, MatchId, NewTurn, Round, RoundId, Strategy, StrategyId, Tournament, TournamentId, Turn,
};

mod sqlite;

pub use sqlite::SqliteStore;

/// Create and query operations used by the engine and by presentation layers.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Register a strategy. Image references are unique.
    async fn create_strategy(&self, name: &str, image: &str) -> anyhow::Result<Strategy>;

    /// Point lookup of a strategy.
    async fn strategy(&self, id: StrategyId) -> anyhow::Result<Option<Strategy>>;

    /// Every registered strategy, by id.
    async fn strategies(&self) -> anyhow::Result<Vec<Strategy>>;

    /// Create an `in_progress` tournament between `strategies`, kept in the given order.
    async fn create_tournament(
        &self,
        strategies: &[StrategyId],
        rounds_count: u32,
    ) -> anyhow::Result<Tournament>;

    /// Point lookup of a tournament, participants included.
    async fn tournament(&self, id: TournamentId) -> anyhow::Result<Option<Tournament>>;

    /// Every tournament, by id.
    async fn tournaments(&self) -> anyhow::Result<Vec<Tournament>>;

    /// Mark an `in_progress` tournament `completed`.
    async fn complete_tournament(
        &self,
        id: TournamentId,
        end_time: OffsetDateTime,
    ) -> anyhow::Result<()>;

    /// Create a round. Fails if `round_number` already exists in the tournament.
    async fn create_round(
        &self,
        tournament_id: TournamentId,
        round_number: u32,
        turns_count: u32,
    ) -> anyhow::Result<Round>;

    /// Rounds of a tournament, by round number.
    async fn rounds(&self, tournament_id: TournamentId) -> anyhow::Result<Vec<Round>>;

    /// Create an `in_progress` match. Fails if the pairing already exists in the round.
    async fn create_match(
        &self,
        round_id: RoundId,
        first: StrategyId,
        second: StrategyId,
    ) -> anyhow::Result<Match>;

    /// Point lookup of a match.
    async fn match_record(&self, id: MatchId) -> anyhow::Result<Option<Match>>;

    /// Matches of a round, by id.
    async fn matches(&self, round_id: RoundId) -> anyhow::Result<Vec<Match>>;

    /// Mark an `in_progress` match `completed`.
    async fn complete_match(&self, id: MatchId, end_time: OffsetDateTime) -> anyhow::Result<()>;

    /// Record both sides of one turn in a single commit.
    async fn record_turn(&self, match_id: MatchId, sides: [NewTurn; 2]) -> anyhow::Result<()>;

    /// Turns of a match, ordered by turn number then side.
    async fn turns(&self, match_id: MatchId) -> anyhow::Result<Vec<Turn>>;
}
