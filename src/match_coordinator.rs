//! Drives one match: two workers, a fixed number of turns, every turn scored and recorded.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use crate::{
    abort::AbortSignal,
    context::Context,
    error::{Error, Result},
    payoff::{score_pair, Move},
    records::{Match, MatchId, NewTurn, RoundId, Side, Strategy, StrategyId},
    store::RecordStore,
    strategy_worker::{Reply, StrategyWorker},
};

/// Result of a fully played match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    /// The match row.
    pub match_id: MatchId,
    /// Strategy ids, by side.
    pub strategies: [StrategyId; 2],
    /// Strategy names, by side.
    pub names: [String; 2],
    /// Number of turns played.
    pub turns: u32,
    /// Total score, by side.
    pub totals: [u32; 2],
    /// Moves that defaulted to cooperation because the worker gave none, by side.
    pub defaults: [u32; 2],
    /// Protocol anomalies observed, by side.
    pub anomalies: [u32; 2],
}

/// Owns the two workers of a match until it is torn down.
pub struct MatchCoordinator {
    record: Match,
    names: [String; 2],
    workers: [StrategyWorker; 2],
    store: Arc<dyn RecordStore>,
}

impl std::fmt::Debug for MatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchCoordinator")
            .field("record", &self.record)
            .field("names", &self.names)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

fn instance_name(match_id: MatchId, side: Side) -> String {
    format!("ipd-match-{match_id}-{}", side.number())
}

impl MatchCoordinator {
    /// Persist the match, then start both workers concurrently.
    ///
    /// If one side fails to start, the other one is torn down and [`Error::MatchSetup`] is
    /// returned. The match row stays `in_progress`.
    #[instrument(skip_all, fields(round_id = round_id, first = %first.name, second = %second.name))]
    pub async fn create(
        ctx: &Context,
        round_id: RoundId,
        first: &Strategy,
        second: &Strategy,
    ) -> Result<MatchCoordinator> {
        let setup_error = |source| Error::MatchSetup {
            round_id,
            first: first.id,
            second: second.id,
            source: Box::new(source),
        };

        let record = ctx
            .store()
            .create_match(round_id, first.id, second.id)
            .await
            .map_err(|e| setup_error(Error::Store(e)))?;
        let first_name = instance_name(record.id, Side::First);
        let second_name = instance_name(record.id, Side::Second);

        let launcher = ctx.launcher().as_ref();
        let started = tokio::join!(
            StrategyWorker::start(launcher, &first.image, &first_name, ctx.config()),
            StrategyWorker::start(launcher, &second.image, &second_name, ctx.config()),
        );
        let workers = match started {
            (Ok(a), Ok(b)) => [a, b],
            (Ok(mut survivor), Err(e)) | (Err(e), Ok(mut survivor)) => {
                survivor.teardown().await;
                return Err(setup_error(e));
            }
            (Err(e), Err(other)) => {
                warn!("both sides of match {} failed to start: {other}", record.id);
                return Err(setup_error(e));
            }
        };
        debug!(match_id = record.id, "match created");

        Ok(MatchCoordinator {
            record,
            names: [first.name.clone(), second.name.clone()],
            workers,
            store: Arc::clone(ctx.store()),
        })
    }

    /// The match row as created.
    pub fn record(&self) -> &Match {
        &self.record
    }

    /// Play `turns_count` turns, then mark the match completed.
    ///
    /// Turns are played one after the other; within a turn both workers are asked concurrently.
    /// Both Turn rows of a turn are committed before the next turn starts. Raising `abort` stops
    /// the match with [`Error::Cancelled`]. Workers are left running, see [`play`](Self::play).
    #[instrument(skip(self, abort), fields(match_id = self.record.id))]
    pub async fn run(&mut self, turns_count: u32, abort: &mut AbortSignal) -> Result<MatchOutcome> {
        let mut outcome = MatchOutcome {
            match_id: self.record.id,
            strategies: self.record.strategies,
            names: self.names.clone(),
            turns: 0,
            totals: [0; 2],
            defaults: [0; 2],
            anomalies: [0; 2],
        };
        let mut previous = None;

        for turn_number in 0..turns_count {
            let moves = tokio::select! {
                biased;
                _ = abort.aborted() => {
                    debug!("match {} cancelled at turn {turn_number}", self.record.id);
                    return Err(Error::Cancelled);
                }
                moves = self.play_turn(turn_number, previous, &mut outcome) => moves,
            };
            previous = Some(moves.map_err(|source| Error::MatchRun {
                match_id: self.record.id,
                turn_number,
                source: Box::new(source),
            })?);
        }

        self.store
            .complete_match(self.record.id, OffsetDateTime::now_utc())
            .await
            .map_err(|e| Error::MatchRun {
                match_id: self.record.id,
                turn_number: turns_count,
                source: Box::new(Error::Store(e)),
            })?;
        debug!(totals = ?outcome.totals, "match completed");
        Ok(outcome)
    }

    async fn play_turn(
        &mut self,
        turn_number: u32,
        previous: Option<[Move; 2]>,
        outcome: &mut MatchOutcome,
    ) -> Result<[Move; 2]> {
        let [first, second] = &mut self.workers;
        // each side receives what its opponent played
        let replies = tokio::join!(
            first.request_move(previous.map(|p| p[Side::First.other().index()])),
            second.request_move(previous.map(|p| p[Side::Second.other().index()])),
        );
        let replies = [replies.0, replies.1];

        let moves = Side::BOTH.map(|side| {
            let worker = &self.workers[side.index()];
            resolve(worker, &replies[side.index()], turn_number)
        });
        let (first_score, second_score) = score_pair(moves[0], moves[1]);
        let scores = [first_score, second_score];

        let turns = Side::BOTH.map(|side| NewTurn {
            turn_number,
            side,
            choice: moves[side.index()],
            score: scores[side.index()],
        });
        self.store
            .record_turn(self.record.id, turns)
            .await
            .map_err(Error::Store)?;

        for side in Side::BOTH {
            let i = side.index();
            outcome.totals[i] += scores[i];
            outcome.anomalies[i] += replies[i].anomalies.len() as u32;
            if replies[i].choice.is_none() {
                outcome.defaults[i] += 1;
            }
        }
        outcome.turns = turn_number + 1;
        Ok(moves)
    }

    /// Stop both workers. Idempotent.
    pub async fn teardown(&mut self) {
        let [first, second] = &mut self.workers;
        tokio::join!(first.teardown(), second.teardown());
    }

    /// [`run`](Self::run) then [`teardown`](Self::teardown), whatever the outcome.
    pub async fn play(mut self, turns_count: u32, abort: &mut AbortSignal) -> Result<MatchOutcome> {
        let result = self.run(turns_count, abort).await;
        self.teardown().await;
        result
    }
}

/// A missing move counts as cooperation.
fn resolve(worker: &StrategyWorker, reply: &Reply, turn_number: u32) -> Move {
    reply.choice.unwrap_or_else(|| {
        warn!(
            worker = worker.name(),
            image = worker.image(),
            "no move at turn {turn_number}, defaulting to C"
        );
        Move::Cooperate
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        abort::AbortHandle,
        context::testing::Fixture,
        launcher::scripted::{Script, ScriptedLauncher},
        records::Status,
        store::testing::InstrumentedStore,
    };

    fn launcher() -> ScriptedLauncher {
        ScriptedLauncher::new()
            .with("cooperate", Script::Always(Move::Cooperate))
            .with("defect", Script::Always(Move::Defect))
            .with("tft", Script::TitForTat)
            .with("silent", Script::Silent)
            .with_broken("broken")
    }

    async fn fixture(store: InstrumentedStore, images: &[&str]) -> (Fixture, RoundId) {
        let fixture = Fixture::new(store, launcher(), images).await;
        let ids = fixture.strategies.iter().map(|s| s.id).collect::<Vec<_>>();
        let tournament = fixture.store.create_tournament(&ids, 1).await.unwrap();
        let round = fixture
            .store
            .create_round(tournament.id, 0, 0)
            .await
            .unwrap();
        (fixture, round.id)
    }

    async fn play(f: &Fixture, round_id: RoundId, a: &str, b: &str, turns: u32) -> Result<MatchOutcome> {
        let coordinator =
            MatchCoordinator::create(&f.ctx, round_id, f.strategy(a), f.strategy(b)).await?;
        coordinator.play(turns, &mut AbortSignal::never()).await
    }

    #[tokio::test]
    async fn cooperator_against_defector() {
        let (f, round_id) = fixture(InstrumentedStore::new(), &["cooperate", "defect"]).await;
        let outcome = play(&f, round_id, "cooperate", "defect", 3).await.unwrap();
        assert_eq!(outcome.totals, [0, 15]);
        assert_eq!(outcome.turns, 3);
        assert_eq!(outcome.defaults, [0, 0]);

        let turns = f.store.turns(outcome.match_id).await.unwrap();
        assert_eq!(turns.len(), 6);
        for (i, turn) in turns.iter().enumerate() {
            assert_eq!(turn.turn_number, i as u32 / 2);
        }
        let record = f.store.match_record(outcome.match_id).await.unwrap().unwrap();
        assert_eq!(record.status, Status::Completed);
        assert!(record.end_time.is_some());
        assert_eq!(f.launcher.stopped().len(), 2);
    }

    #[tokio::test]
    async fn mutual_cooperation() {
        let (f, round_id) = fixture(InstrumentedStore::new(), &["cooperate", "tft"]).await;
        let outcome = play(&f, round_id, "cooperate", "tft", 5).await.unwrap();
        assert_eq!(outcome.totals, [15, 15]);
        assert_eq!(outcome.anomalies, [0, 0]);
    }

    #[tokio::test]
    async fn tit_for_tat_retaliates() {
        let (f, round_id) = fixture(InstrumentedStore::new(), &["tft", "defect"]).await;
        let outcome = play(&f, round_id, "tft", "defect", 4).await.unwrap();
        // C/D then D/D three times
        assert_eq!(outcome.totals, [3, 5 + 3]);
    }

    #[tokio::test]
    async fn silence_defaults_to_cooperation() {
        let (f, round_id) = fixture(InstrumentedStore::new(), &["silent", "defect"]).await;
        let outcome = play(&f, round_id, "silent", "defect", 2).await.unwrap();
        assert_eq!(outcome.defaults, [2, 0]);
        assert_eq!(outcome.anomalies, [2, 0]);
        assert_eq!(outcome.totals, [0, 10]);

        let turns = f.store.turns(outcome.match_id).await.unwrap();
        let silent_moves = turns
            .iter()
            .filter(|t| t.side == Side::First)
            .map(|t| t.choice)
            .collect::<Vec<_>>();
        assert_eq!(silent_moves, vec![Move::Cooperate, Move::Cooperate]);
    }

    #[tokio::test]
    async fn self_play_uses_two_instances() {
        let (f, round_id) = fixture(InstrumentedStore::new(), &["tft"]).await;
        let outcome = play(&f, round_id, "tft", "tft", 3).await.unwrap();
        assert_eq!(outcome.totals, [9, 9]);
        let started = f.launcher.started();
        assert_eq!(started.len(), 2);
        assert_ne!(started[0], started[1]);
        assert!(started.contains(&format!("ipd-match-{}-1", outcome.match_id)));
        assert!(started.contains(&format!("ipd-match-{}-2", outcome.match_id)));
    }

    #[tokio::test]
    async fn launch_failure_tears_down_the_other_side() {
        let (f, round_id) = fixture(InstrumentedStore::new(), &["cooperate", "broken"]).await;
        let err = play(&f, round_id, "cooperate", "broken", 3)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MatchSetup { .. }));
        assert_eq!(f.launcher.started(), f.launcher.stopped());
        assert_eq!(f.launcher.started().len(), 1);

        let matches = f.store.matches(round_id).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].status, Status::InProgress);
    }

    #[tokio::test]
    async fn store_failure_stops_the_match() {
        let (f, round_id) =
            fixture(InstrumentedStore::failing_at_turn(1), &["cooperate", "defect"]).await;
        let err = play(&f, round_id, "cooperate", "defect", 3)
            .await
            .unwrap_err();
        let Error::MatchRun {
            match_id,
            turn_number,
            ..
        } = &err
        else {
            panic!("unexpected error {err:?}");
        };
        assert_eq!(*turn_number, 1);
        let match_id = *match_id;
        assert_eq!(f.store.turns(match_id).await.unwrap().len(), 2);
        let record = f.store.match_record(match_id).await.unwrap().unwrap();
        assert_eq!(record.status, Status::InProgress);
        assert_eq!(f.launcher.stopped().len(), 2);
    }

    #[tokio::test]
    async fn abort_cancels_and_tears_down() {
        let (f, round_id) = fixture(InstrumentedStore::new(), &["cooperate", "defect"]).await;
        let coordinator = MatchCoordinator::create(
            &f.ctx,
            round_id,
            f.strategy("cooperate"),
            f.strategy("defect"),
        )
        .await
        .unwrap();
        let (handle, mut signal) = AbortHandle::new();
        handle.abort();
        let err = coordinator.play(10, &mut signal).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(f.launcher.stopped().len(), 2);
    }
}
