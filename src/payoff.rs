//! Moves of the iterated prisoner's dilemma and the payoff matrix used to score them.

use std::{fmt::Display, str::FromStr};

/// One of the two moves a strategy can play on a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Move {
    /// Canonical name `"C"`.
    Cooperate,
    /// Canonical name `"D"`.
    Defect,
}

impl Move {
    /// Canonical name sent over the worker protocol and stored in the record store.
    pub fn as_str(self) -> &'static str {
        match self {
            Move::Cooperate => "C",
            Move::Defect => "D",
        }
    }
}

impl Display for Move {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a token is neither `"C"` nor `"D"`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a valid move")]
pub struct ParseMoveError(pub String);

impl FromStr for Move {
    type Err = ParseMoveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "C" => Ok(Move::Cooperate),
            "D" => Ok(Move::Defect),
            other => Err(ParseMoveError(other.to_string())),
        }
    }
}

/// Score earned by the player who played `own` while the opponent played `other`.
///
/// | own \ other | C | D |
/// |-------------|---|---|
/// | C           | 3 | 0 |
/// | D           | 5 | 1 |
///
/// The matrix is read from the scoring side's point of view, so both sides of a
/// turn must be scored separately: `score(a, b)` and `score(b, a)`.
pub fn score(own: Move, other: Move) -> u32 {
    match (own, other) {
        (Move::Cooperate, Move::Cooperate) => 3,
        (Move::Cooperate, Move::Defect) => 0,
        (Move::Defect, Move::Cooperate) => 5,
        (Move::Defect, Move::Defect) => 1,
    }
}

/// Scores of both sides for one turn, in the same order as the moves.
pub fn score_pair(first: Move, second: Move) -> (u32, u32) {
    (score(first, second), score(second, first))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOVES: [Move; 2] = [Move::Cooperate, Move::Defect];

    #[test]
    fn matrix_values() {
        assert_eq!(score(Move::Cooperate, Move::Cooperate), 3);
        assert_eq!(score(Move::Cooperate, Move::Defect), 0);
        assert_eq!(score(Move::Defect, Move::Cooperate), 5);
        assert_eq!(score(Move::Defect, Move::Defect), 1);
    }

    #[test]
    fn pair_sums() {
        for a in MOVES {
            for b in MOVES {
                let (sa, sb) = score_pair(a, b);
                let expected = match (a, b) {
                    (Move::Cooperate, Move::Cooperate) => 6,
                    (Move::Defect, Move::Defect) => 2,
                    _ => 5,
                };
                assert_eq!(sa + sb, expected, "{a} vs {b}");
                assert_eq!((sa, sb), (score(a, b), score(b, a)));
            }
        }
    }

    #[test]
    fn parse_canonical_names() {
        for m in MOVES {
            assert_eq!(m.as_str().parse::<Move>(), Ok(m));
        }
        assert!("c".parse::<Move>().is_err());
        assert!("C ".parse::<Move>().is_err());
        assert!("".parse::<Move>().is_err());
        assert_eq!(
            "maybe".parse::<Move>(),
            Err(ParseMoveError("maybe".to_string()))
        );
    }
}
