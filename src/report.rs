//! Read-side aggregation of recorded turns, for presentation layers.

use std::collections::HashMap;

use anyhow::{bail, Context};

use crate::{
    payoff::Move,
    records::{MatchId, Side, Status, Strategy, StrategyId, TournamentId},
    store::RecordStore,
};

/// Total score of one strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standing {
    /// The participant.
    pub strategy: Strategy,
    /// Sum of its recorded turn scores.
    pub score: u64,
}

/// Side totals of one match, for a results table keyed by pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingResult {
    /// The match.
    pub match_id: MatchId,
    /// Round the match belongs to.
    pub round_number: u32,
    /// Strategy ids, by side.
    pub strategies: [StrategyId; 2],
    /// Sum of the recorded turn scores, by side.
    pub totals: [u64; 2],
    /// `in_progress` for a match that failed or was cancelled.
    pub status: Status,
}

/// Both sides of one recorded turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnSummary {
    /// 0-based turn number.
    pub turn_number: u32,
    /// Moves, by side.
    pub moves: [Move; 2],
    /// Scores of this turn, by side.
    pub scores: [u32; 2],
    /// Scores of every turn up to this one included, by side.
    pub cumulative: [u64; 2],
}

/// Scores of every participant of a tournament, best first.
///
/// Only `round_number` is counted when given, every recorded round otherwise. A strategy
/// playing itself earns the score of both sides. Ties keep the registration order.
pub async fn standings(
    store: &dyn RecordStore,
    tournament_id: TournamentId,
    round_number: Option<u32>,
) -> anyhow::Result<Vec<Standing>> {
    let tournament = store
        .tournament(tournament_id)
        .await?
        .with_context(|| format!("unknown tournament {tournament_id}"))?;

    let mut scores = HashMap::new();
    for round in store.rounds(tournament_id).await? {
        if round_number.is_some_and(|n| n != round.round_number) {
            continue;
        }
        for record in store.matches(round.id).await? {
            for turn in store.turns(record.id).await? {
                *scores.entry(record.strategy(turn.side)).or_insert(0u64) += u64::from(turn.score);
            }
        }
    }

    let mut standings = tournament
        .strategies
        .into_iter()
        .map(|strategy| Standing {
            score: scores.get(&strategy.id).copied().unwrap_or(0),
            strategy,
        })
        .collect::<Vec<_>>();
    standings.sort_by(|a, b| b.score.cmp(&a.score));
    Ok(standings)
}

/// Results of every match of a tournament, ordered by round then by pairing.
///
/// Only `round_number` is reported when given. Matches without recorded turns are included with
/// zero totals.
pub async fn pairing_results(
    store: &dyn RecordStore,
    tournament_id: TournamentId,
    round_number: Option<u32>,
) -> anyhow::Result<Vec<PairingResult>> {
    if store.tournament(tournament_id).await?.is_none() {
        bail!("unknown tournament {tournament_id}");
    }

    let mut results = vec![];
    for round in store.rounds(tournament_id).await? {
        if round_number.is_some_and(|n| n != round.round_number) {
            continue;
        }
        for record in store.matches(round.id).await? {
            let mut totals = [0u64; 2];
            for turn in store.turns(record.id).await? {
                totals[turn.side.index()] += u64::from(turn.score);
            }
            results.push(PairingResult {
                match_id: record.id,
                round_number: round.round_number,
                strategies: record.strategies,
                totals,
                status: record.status,
            });
        }
    }
    Ok(results)
}

/// Turn by turn history of a match, with running totals.
pub async fn match_history(
    store: &dyn RecordStore,
    match_id: MatchId,
) -> anyhow::Result<Vec<TurnSummary>> {
    let turns = store.turns(match_id).await?;
    let mut history: Vec<TurnSummary> = Vec::with_capacity(turns.len() / 2);
    let mut cumulative = [0u64; 2];

    // turns come ordered by turn number, then side
    for pair in turns.chunks(2) {
        let [first, second] = pair else {
            bail!("match {match_id} has an incomplete turn");
        };
        if first.turn_number != second.turn_number
            || first.side != Side::First
            || second.side != Side::Second
        {
            bail!(
                "match {match_id} has an incomplete turn {}",
                first.turn_number
            );
        }
        cumulative[0] += u64::from(first.score);
        cumulative[1] += u64::from(second.score);
        history.push(TurnSummary {
            turn_number: first.turn_number,
            moves: [first.choice, second.choice],
            scores: [first.score, second.score],
            cumulative,
        });
    }
    Ok(history)
}
