use rand::{rngs::StdRng, SeedableRng};
use time::OffsetDateTime;
use tracing::{info, instrument, trace};

use crate::{
    context::Context,
    error::{Error, Result},
    records::{Status, StrategyId, Tournament},
    round_scheduler::{RoundOutcome, RoundScheduler},
};

/// Runs the rounds of one tournament, strictly one after another.
#[derive(Debug)]
pub struct TournamentScheduler {
    ctx: Context,
    tournament: Tournament,
}

impl TournamentScheduler {
    /// Register an `in_progress` tournament between `strategy_ids`.
    ///
    /// Duplicated ids are only kept once, at their first position.
    ///
    /// # Errors
    /// [`Error::NoStrategies`] for an empty list, [`Error::UnknownStrategy`] for an id missing
    /// from the record store, [`Error::Store`] if the store fails.
    #[instrument(skip(ctx))]
    pub async fn create(
        ctx: &Context,
        strategy_ids: &[StrategyId],
        rounds_count: u32,
    ) -> Result<TournamentScheduler> {
        let mut ids = Vec::with_capacity(strategy_ids.len());
        for id in strategy_ids {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        if ids.is_empty() {
            return Err(Error::NoStrategies);
        }
        for &id in &ids {
            if ctx.store().strategy(id).await.map_err(Error::Store)?.is_none() {
                return Err(Error::UnknownStrategy(id));
            }
        }

        let tournament = ctx
            .store()
            .create_tournament(&ids, rounds_count)
            .await
            .map_err(Error::Store)?;
        info!(tournament_id = tournament.id, "tournament created");
        Ok(TournamentScheduler {
            ctx: ctx.clone(),
            tournament,
        })
    }

    /// The tournament row, updated once [`run`](Self::run) succeeds.
    pub fn tournament(&self) -> &Tournament {
        &self.tournament
    }

    /// Play every round, then mark the tournament completed.
    ///
    /// Each round gets a turn count from the configured
    /// [`TurnsPolicy`](crate::configuration::TurnsPolicy) and is fully completed before the
    /// next one is created. The first failing round halts the tournament, which stays
    /// `in_progress`; nothing is retried.
    #[instrument(skip(self), fields(tournament_id = self.tournament.id))]
    pub async fn run(&mut self) -> Result<Vec<RoundOutcome>> {
        let mut rng = StdRng::from_entropy();
        let mut rounds = Vec::new();

        for round_number in 0..self.tournament.rounds_count {
            let turns_count = self.ctx.config().turns.sample(&mut rng);
            trace!("next round: {round_number} ({turns_count} turns)");
            let round = self
                .ctx
                .store()
                .create_round(self.tournament.id, round_number, turns_count)
                .await
                .map_err(Error::Store)?;
            let scheduler =
                RoundScheduler::new(self.ctx.clone(), round, self.tournament.strategies.clone());
            rounds.push(scheduler.run().await?);
        }

        let end_time = OffsetDateTime::now_utc();
        self.ctx
            .store()
            .complete_tournament(self.tournament.id, end_time)
            .await
            .map_err(Error::Store)?;
        self.tournament.status = Status::Completed;
        self.tournament.end_time = Some(end_time);
        info!("tournament {} completed", self.tournament.id);
        Ok(rounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        configuration::TurnsPolicy,
        context::testing::Fixture,
        launcher::scripted::{Script, ScriptedLauncher},
        payoff::Move,
        store::{
            testing::{Event, InstrumentedStore},
            RecordStore,
        },
    };

    fn launcher() -> ScriptedLauncher {
        ScriptedLauncher::new()
            .with("cooperate", Script::Always(Move::Cooperate))
            .with("defect", Script::Always(Move::Defect))
            .with("tft", Script::TitForTat)
            .with_broken("broken")
    }

    fn with_turns(f: &mut Fixture, turns: TurnsPolicy) {
        f.ctx.config = f.ctx.config.with_turns(turns);
    }

    #[tokio::test]
    async fn rejects_bad_participants() {
        let f = Fixture::new(InstrumentedStore::new(), launcher(), &["tft"]).await;
        let err = TournamentScheduler::create(&f.ctx, &[], 1).await.unwrap_err();
        assert!(matches!(err, Error::NoStrategies));

        let id = f.strategies[0].id;
        let err = TournamentScheduler::create(&f.ctx, &[id, id + 100], 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownStrategy(missing) if missing == id + 100));
        assert!(f.store.tournaments().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicates_are_removed() {
        let f = Fixture::new(InstrumentedStore::new(), launcher(), &["tft", "defect"]).await;
        let [a, b] = [f.strategies[0].id, f.strategies[1].id];
        let scheduler = TournamentScheduler::create(&f.ctx, &[b, a, b, a], 2)
            .await
            .unwrap();
        let ids = scheduler
            .tournament()
            .strategies
            .iter()
            .map(|s| s.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![b, a]);
        assert_eq!(scheduler.tournament().status, Status::InProgress);
    }

    #[tokio::test]
    async fn rounds_run_one_after_another() {
        let mut f = Fixture::new(InstrumentedStore::new(), launcher(), &["cooperate", "defect"]).await;
        with_turns(&mut f, TurnsPolicy::Fixed(3));
        let ids = f.strategies.iter().map(|s| s.id).collect::<Vec<_>>();
        let mut scheduler = TournamentScheduler::create(&f.ctx, &ids, 3).await.unwrap();
        let rounds = scheduler.run().await.unwrap();
        assert_eq!(rounds.len(), 3);
        assert_eq!(scheduler.tournament().status, Status::Completed);

        // every match of round n completes before round n + 1 exists
        let events = f.store.events();
        let mut completed = 0;
        for (position, event) in events.iter().enumerate() {
            match event {
                Event::RoundCreated(n) => assert_eq!(completed, 3 * *n as usize, "{position}"),
                Event::MatchCompleted(_) => completed += 1,
            }
        }
        assert_eq!(completed, 9);

        let stored = f.store.tournament(scheduler.tournament().id).await.unwrap().unwrap();
        assert_eq!(stored.status, Status::Completed);
        assert!(stored.end_time.is_some());
        let numbers = f
            .store
            .rounds(stored.id)
            .await
            .unwrap()
            .iter()
            .map(|r| (r.round_number, r.turns_count))
            .collect::<Vec<_>>();
        assert_eq!(numbers, vec![(0, 3), (1, 3), (2, 3)]);
    }

    #[tokio::test]
    async fn sampled_turns_stay_in_range() {
        let mut f = Fixture::new(InstrumentedStore::new(), launcher(), &["tft"]).await;
        with_turns(&mut f, TurnsPolicy::Uniform { min: 1, max: 4 });
        let ids = [f.strategies[0].id];
        let mut scheduler = TournamentScheduler::create(&f.ctx, &ids, 4).await.unwrap();
        let rounds = scheduler.run().await.unwrap();
        for round in rounds {
            assert!((1..=4).contains(&round.round.turns_count));
            assert_eq!(round.matches[0].turns, round.round.turns_count);
        }
    }

    #[tokio::test]
    async fn failed_round_halts_the_tournament() {
        let mut f = Fixture::new(InstrumentedStore::new(), launcher(), &["cooperate", "broken"]).await;
        with_turns(&mut f, TurnsPolicy::Fixed(2));
        let ids = f.strategies.iter().map(|s| s.id).collect::<Vec<_>>();
        let mut scheduler = TournamentScheduler::create(&f.ctx, &ids, 3).await.unwrap();
        let err = scheduler.run().await.unwrap_err();
        assert!(matches!(err, Error::Round { round_number: 0, .. }));

        assert_eq!(f.store.events(), vec![Event::RoundCreated(0)]);
        let stored = f.store.tournament(scheduler.tournament().id).await.unwrap().unwrap();
        assert_eq!(stored.status, Status::InProgress);
        assert_eq!(stored.end_time, None);
    }

    #[tokio::test]
    async fn huge_round_count_is_played_lazily() {
        let mut f = Fixture::new(InstrumentedStore::new(), launcher(), &["broken"]).await;
        with_turns(&mut f, TurnsPolicy::Fixed(1));
        let ids = [f.strategies[0].id];
        let mut scheduler = TournamentScheduler::create(&f.ctx, &ids, u32::MAX)
            .await
            .unwrap();
        let err = scheduler.run().await.unwrap_err();
        assert!(matches!(err, Error::Round { round_number: 0, .. }));
        assert_eq!(f.store.events(), vec![Event::RoundCreated(0)]);
    }

    #[tokio::test]
    async fn zero_rounds_completes_immediately() {
        let f = Fixture::new(InstrumentedStore::new(), launcher(), &["tft"]).await;
        let mut scheduler = TournamentScheduler::create(&f.ctx, &[f.strategies[0].id], 0)
            .await
            .unwrap();
        assert!(scheduler.run().await.unwrap().is_empty());
        assert_eq!(scheduler.tournament().status, Status::Completed);
        assert!(f.launcher.started().is_empty());
    }
}
