//! Runs every pairing of one round concurrently.

use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::{
    abort::AbortHandle,
    context::Context,
    error::{Error, Result},
    match_coordinator::{MatchCoordinator, MatchOutcome},
    records::{Round, Strategy},
};

/// Every unordered pairing with repetition of `strategies`, in a deterministic order.
///
/// `n` strategies give `n * (n + 1) / 2` pairings: `(s[i], s[j])` for every `i <= j`, so each
/// strategy also meets itself exactly once.
pub fn round_robin_pairings<T: Clone>(strategies: &[T]) -> Vec<(T, T)> {
    let n = strategies.len();
    let mut pairings = Vec::with_capacity(n * (n + 1) / 2);
    for i in 0..n {
        for j in i..n {
            pairings.push((strategies[i].clone(), strategies[j].clone()));
        }
    }
    pairings
}

/// Results of a completed round, matches in pairing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundOutcome {
    /// The round row.
    pub round: Round,
    /// One outcome per pairing.
    pub matches: Vec<MatchOutcome>,
}

/// Plays one round between a fixed list of strategies.
#[derive(Debug)]
pub struct RoundScheduler {
    ctx: Context,
    round: Round,
    strategies: Vec<Strategy>,
}

impl RoundScheduler {
    /// Prepare `round` between `strategies`, in registration order.
    pub fn new(ctx: Context, round: Round, strategies: Vec<Strategy>) -> Self {
        Self {
            ctx,
            round,
            strategies,
        }
    }

    /// Create every match, then play them all.
    ///
    /// If a match cannot be created, the matches that could are torn down and the round fails.
    /// If a match fails while playing, every sibling is cancelled and has torn down its workers
    /// before the failure is returned. No partial result is returned.
    #[instrument(skip(self), fields(round = self.round.round_number, turns = self.round.turns_count))]
    pub async fn run(&self) -> Result<RoundOutcome> {
        let round_error = |source| Error::Round {
            round_number: self.round.round_number,
            source: Box::new(source),
        };
        let coordinators = self.create_matches().await.map_err(round_error)?;
        let matches = self.play_matches(coordinators).await.map_err(round_error)?;
        info!("round {} completed", self.round.round_number);
        Ok(RoundOutcome {
            round: self.round,
            matches,
        })
    }

    async fn create_matches(&self) -> Result<Vec<MatchCoordinator>> {
        let pairings = round_robin_pairings(&self.strategies);
        let count = pairings.len();
        debug!("creating {count} matches");

        let mut creations = JoinSet::new();
        for (index, (first, second)) in pairings.into_iter().enumerate() {
            let ctx = self.ctx.clone();
            let round_id = self.round.id;
            creations.spawn(async move {
                let created = MatchCoordinator::create(&ctx, round_id, &first, &second).await;
                (index, created)
            });
        }

        let mut coordinators = (0..count).map(|_| None).collect::<Vec<_>>();
        let mut failure = None;
        while let Some(joined) = creations.join_next().await {
            let error = match joined {
                Ok((index, Ok(coordinator))) => {
                    coordinators[index] = Some(coordinator);
                    continue;
                }
                Ok((_, Err(e))) => e,
                Err(e) => Error::TaskFailed(e),
            };
            if failure.is_none() {
                failure = Some(error);
            } else {
                warn!("another match could not be created: {error}");
            }
        }

        if let Some(error) = failure {
            for coordinator in coordinators.iter_mut().flatten() {
                debug!("tearing down match {}", coordinator.record().id);
                coordinator.teardown().await;
            }
            return Err(error);
        }
        Ok(coordinators.into_iter().flatten().collect())
    }

    async fn play_matches(&self, coordinators: Vec<MatchCoordinator>) -> Result<Vec<MatchOutcome>> {
        let count = coordinators.len();
        let (abort, _) = AbortHandle::new();

        let mut matches = JoinSet::new();
        for (index, coordinator) in coordinators.into_iter().enumerate() {
            let mut signal = abort.signal();
            let turns_count = self.round.turns_count;
            matches.spawn(async move { (index, coordinator.play(turns_count, &mut signal).await) });
        }

        let mut outcomes = vec![None; count];
        let mut failure = None;
        // drain everything: cancelled siblings report back once their workers are stopped
        while let Some(joined) = matches.join_next().await {
            let error = match joined {
                Ok((index, Ok(outcome))) => {
                    if self.ctx.config().verbose {
                        print_match_result(&outcome);
                    }
                    outcomes[index] = Some(outcome);
                    continue;
                }
                Ok((_, Err(e))) => e,
                Err(e) => Error::TaskFailed(e),
            };
            if error.is_cancelled() {
                continue;
            }
            if failure.is_none() {
                warn!("{error}, cancelling the other matches of the round");
                abort.abort();
                failure = Some(error);
            } else {
                warn!("another match failed: {error}");
            }
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(outcomes.into_iter().flatten().collect()),
        }
    }
}

fn print_match_result(outcome: &MatchOutcome) {
    let [first, second] = &outcome.names;
    let [first_score, second_score] = outcome.totals;
    let defaults = if outcome.defaults == [0, 0] {
        String::new()
    } else {
        format!(
            "defaulted moves: {}-{}",
            outcome.defaults[0], outcome.defaults[1]
        )
    };
    // clear line, green match, results, red defaults
    println!(
        "\x1b[2K\x1b[32m[{first} VS {second}]: \x1b[39m{first_score}-{second_score} \x1b[31m{defaults}\x1b[39m"
    );
}
