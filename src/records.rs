//! Rows kept by the record store: strategies, tournaments, rounds, matches and turns.

use std::fmt::Display;

use time::OffsetDateTime;

use crate::payoff::Move;

/// Identifier of a [`Strategy`].
pub type StrategyId = i64;
/// Identifier of a [`Tournament`].
pub type TournamentId = i64;
/// Identifier of a [`Round`].
pub type RoundId = i64;
/// Identifier of a [`Match`].
pub type MatchId = i64;

/// Lifecycle of tournaments and matches. Transitions only go forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Created, not finished yet (or failed and left as is).
    InProgress,
    /// Every round / turn was played and recorded.
    Completed,
}

impl Status {
    /// Name stored in the record store.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::InProgress => "in_progress",
            Status::Completed => "completed",
        }
    }

    /// Inverse of [`Status::as_str`].
    pub fn from_name(name: &str) -> Option<Status> {
        match name {
            "in_progress" => Some(Status::InProgress),
            "completed" => Some(Status::Completed),
            _ => None,
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which seat of a match a strategy occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Side {
    /// Side A, the first strategy of the pairing.
    First,
    /// Side B, the second strategy of the pairing.
    Second,
}

impl Side {
    /// Both sides, in seat order.
    pub const BOTH: [Side; 2] = [Side::First, Side::Second];

    /// Position in per-side arrays.
    pub fn index(self) -> usize {
        match self {
            Side::First => 0,
            Side::Second => 1,
        }
    }

    /// Number stored in the record store (1 or 2).
    pub fn number(self) -> u8 {
        self.index() as u8 + 1
    }

    /// Inverse of [`Side::number`].
    pub fn from_number(n: u8) -> Option<Side> {
        match n {
            1 => Some(Side::First),
            2 => Some(Side::Second),
            _ => None,
        }
    }

    /// The opponent's seat.
    pub fn other(self) -> Side {
        match self {
            Side::First => Side::Second,
            Side::Second => Side::First,
        }
    }
}

/// A registered strategy: a named reference to an executable image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strategy {
    /// Row id.
    pub id: StrategyId,
    /// Display name.
    pub name: String,
    /// Image reference handed to the launcher.
    pub image: String,
    /// Registration time.
    pub created_at: OffsetDateTime,
}

/// One run of the round-robin competition.
#[derive(Debug, Clone, PartialEq)]
pub struct Tournament {
    /// Row id.
    pub id: TournamentId,
    /// Creation time.
    pub start_time: OffsetDateTime,
    /// Set once every round completed.
    pub end_time: Option<OffsetDateTime>,
    /// `completed` only after the last round.
    pub status: Status,
    /// Configured number of rounds.
    pub rounds_count: u32,
    /// Participants, in registration order.
    pub strategies: Vec<Strategy>,
}

/// One round of a tournament: every pairing plays one match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Round {
    /// Row id.
    pub id: RoundId,
    /// Owning tournament.
    pub tournament_id: TournamentId,
    /// 0-based, contiguous within a tournament.
    pub round_number: u32,
    /// Number of turns every match of this round plays.
    pub turns_count: u32,
}

/// A pairing of two strategies within a round. Both may be the same strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    /// Row id.
    pub id: MatchId,
    /// Owning round.
    pub round_id: RoundId,
    /// Strategy ids indexed by [`Side::index`].
    pub strategies: [StrategyId; 2],
    /// Creation time.
    pub start_time: OffsetDateTime,
    /// Set when the last turn was recorded.
    pub end_time: Option<OffsetDateTime>,
    /// `completed` only after every turn was recorded.
    pub status: Status,
}

impl Match {
    /// Strategy playing on `side`.
    pub fn strategy(&self, side: Side) -> StrategyId {
        self.strategies[side.index()]
    }
}

/// The move and score of one side for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewTurn {
    /// 0-based turn number.
    pub turn_number: u32,
    /// Side that played `choice`.
    pub side: Side,
    /// Resolved move (defaults already applied).
    pub choice: Move,
    /// Payoff earned by `side`.
    pub score: u32,
}

/// A recorded [`NewTurn`].
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    /// Row id.
    pub id: i64,
    /// Owning match.
    pub match_id: MatchId,
    /// 0-based turn number.
    pub turn_number: u32,
    /// Side that played `choice`.
    pub side: Side,
    /// Recorded move, never the noisy one sent to the opponent.
    pub choice: Move,
    /// Payoff earned by `side`.
    pub score: u32,
    /// Commit time.
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_numbers_round_trip() {
        for side in Side::BOTH {
            assert_eq!(Side::from_number(side.number()), Some(side));
            assert_eq!(side.other().other(), side);
        }
        assert_eq!(Side::from_number(0), None);
        assert_eq!(Side::from_number(3), None);
    }
}
