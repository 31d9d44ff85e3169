use std::{
    path::Path,
    sync::{Mutex, MutexGuard},
};

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use rusqlite::{
    params,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Value, ValueRef},
    Connection, OptionalExtension, Row, ToSql,
};
use time::OffsetDateTime;
use tracing::{debug, instrument};

use super::RecordStore;
use crate::{
    payoff::Move,
    records::{
        Match, MatchId, NewTurn, Round, RoundId, Side, Status, Strategy, StrategyId, Tournament,
        TournamentId, Turn,
    },
};

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS strategies (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT    NOT NULL,
    image       TEXT    NOT NULL UNIQUE,
    created_at  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS tournaments (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    start_time   TEXT    NOT NULL,
    end_time     TEXT,
    status       TEXT    NOT NULL DEFAULT 'in_progress',
    rounds_count INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS tournament_strategies (
    tournament_id INTEGER NOT NULL REFERENCES tournaments (id) ON DELETE CASCADE,
    strategy_id   INTEGER NOT NULL REFERENCES strategies (id) ON DELETE CASCADE,
    position      INTEGER NOT NULL,
    PRIMARY KEY (tournament_id, strategy_id)
);

CREATE TABLE IF NOT EXISTS rounds (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    tournament_id INTEGER NOT NULL REFERENCES tournaments (id) ON DELETE CASCADE,
    round_number  INTEGER NOT NULL,
    turns_count   INTEGER NOT NULL,
    UNIQUE (tournament_id, round_number)
);

CREATE TABLE IF NOT EXISTS matches (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    round_id     INTEGER NOT NULL REFERENCES rounds (id) ON DELETE CASCADE,
    strategy1_id INTEGER NOT NULL REFERENCES strategies (id),
    strategy2_id INTEGER NOT NULL REFERENCES strategies (id),
    start_time   TEXT    NOT NULL,
    end_time     TEXT,
    status       TEXT    NOT NULL DEFAULT 'in_progress',
    UNIQUE (round_id, strategy1_id, strategy2_id)
);

CREATE TABLE IF NOT EXISTS turns (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    match_id    INTEGER NOT NULL REFERENCES matches (id) ON DELETE CASCADE,
    turn_number INTEGER NOT NULL,
    side        INTEGER NOT NULL,
    move        TEXT    NOT NULL,
    score       INTEGER NOT NULL,
    created_at  TEXT    NOT NULL,
    UNIQUE (match_id, turn_number, side)
);
";

/// [`RecordStore`] backed by SQLite.
///
/// The connection sits behind a mutex: every call runs to completion without yielding, so
/// commits of concurrently running matches are serialized.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file and make sure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("could not open database {}", path.display()))?;
        Self::bootstrap(conn)
    }

    /// A private database living as long as the store.
    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("could not open in-memory database")?;
        Self::bootstrap(conn)
    }

    fn bootstrap(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("could not create schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("record store connection poisoned"))
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

fn strategy_from_row(row: &Row<'_>) -> rusqlite::Result<Strategy> {
    Ok(Strategy {
        id: row.get(0)?,
        name: row.get(1)?,
        image: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn round_from_row(row: &Row<'_>) -> rusqlite::Result<Round> {
    Ok(Round {
        id: row.get(0)?,
        tournament_id: row.get(1)?,
        round_number: row.get(2)?,
        turns_count: row.get(3)?,
    })
}

fn match_from_row(row: &Row<'_>) -> rusqlite::Result<Match> {
    Ok(Match {
        id: row.get(0)?,
        round_id: row.get(1)?,
        strategies: [row.get(2)?, row.get(3)?],
        start_time: row.get(4)?,
        end_time: row.get(5)?,
        status: row.get(6)?,
    })
}

fn turn_from_row(row: &Row<'_>) -> rusqlite::Result<Turn> {
    Ok(Turn {
        id: row.get(0)?,
        match_id: row.get(1)?,
        turn_number: row.get(2)?,
        side: row.get(3)?,
        choice: row.get(4)?,
        score: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const MATCH_COLUMNS: &str =
    "id, round_id, strategy1_id, strategy2_id, start_time, end_time, status";

fn load_tournament(conn: &Connection, id: TournamentId) -> rusqlite::Result<Option<Tournament>> {
    let tournament = conn
        .query_row(
            "SELECT id, start_time, end_time, status, rounds_count FROM tournaments WHERE id = ?1",
            params![id],
            |row| {
                Ok(Tournament {
                    id: row.get(0)?,
                    start_time: row.get(1)?,
                    end_time: row.get(2)?,
                    status: row.get(3)?,
                    rounds_count: row.get(4)?,
                    strategies: vec![],
                })
            },
        )
        .optional()?;
    let Some(mut tournament) = tournament else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT s.id, s.name, s.image, s.created_at
         FROM tournament_strategies ts
         JOIN strategies s ON s.id = ts.strategy_id
         WHERE ts.tournament_id = ?1
         ORDER BY ts.position",
    )?;
    tournament.strategies = stmt
        .query_map(params![id], strategy_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(Some(tournament))
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn create_strategy(&self, name: &str, image: &str) -> anyhow::Result<Strategy> {
        let conn = self.conn()?;
        let created_at = OffsetDateTime::now_utc();
        conn.execute(
            "INSERT INTO strategies (name, image, created_at) VALUES (?1, ?2, ?3)",
            params![name, image, created_at],
        )
        .with_context(|| format!("could not register strategy '{name}' ({image})"))?;
        Ok(Strategy {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            image: image.to_string(),
            created_at,
        })
    }

    async fn strategy(&self, id: StrategyId) -> anyhow::Result<Option<Strategy>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, image, created_at FROM strategies WHERE id = ?1",
            params![id],
            strategy_from_row,
        )
        .optional()
        .with_context(|| format!("could not read strategy {id}"))
    }

    async fn strategies(&self) -> anyhow::Result<Vec<Strategy>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, name, image, created_at FROM strategies ORDER BY id")?;
        let strategies = stmt
            .query_map([], strategy_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("could not read strategies")?;
        Ok(strategies)
    }

    #[instrument(skip(self))]
    async fn create_tournament(
        &self,
        strategies: &[StrategyId],
        rounds_count: u32,
    ) -> anyhow::Result<Tournament> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO tournaments (start_time, status, rounds_count) VALUES (?1, ?2, ?3)",
            params![OffsetDateTime::now_utc(), Status::InProgress, rounds_count],
        )
        .context("could not create tournament")?;
        let id = tx.last_insert_rowid();
        for (position, strategy_id) in strategies.iter().enumerate() {
            tx.execute(
                "INSERT INTO tournament_strategies (tournament_id, strategy_id, position)
                 VALUES (?1, ?2, ?3)",
                params![id, strategy_id, position as i64],
            )
            .with_context(|| format!("could not add strategy {strategy_id} to tournament"))?;
        }
        tx.commit()?;
        debug!(tournament_id = id, "tournament created");

        load_tournament(&conn, id)?.with_context(|| format!("tournament {id} vanished"))
    }

    async fn tournament(&self, id: TournamentId) -> anyhow::Result<Option<Tournament>> {
        let conn = self.conn()?;
        load_tournament(&conn, id).with_context(|| format!("could not read tournament {id}"))
    }

    async fn tournaments(&self) -> anyhow::Result<Vec<Tournament>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id FROM tournaments ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, TournamentId>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut tournaments = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(tournament) = load_tournament(&conn, id)? {
                tournaments.push(tournament);
            }
        }
        Ok(tournaments)
    }

    async fn complete_tournament(
        &self,
        id: TournamentId,
        end_time: OffsetDateTime,
    ) -> anyhow::Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE tournaments SET status = ?1, end_time = ?2 WHERE id = ?3 AND status = ?4",
            params![Status::Completed, end_time, id, Status::InProgress],
        )?;
        if updated == 0 {
            bail!("tournament {id} does not exist or is not in progress");
        }
        Ok(())
    }

    async fn create_round(
        &self,
        tournament_id: TournamentId,
        round_number: u32,
        turns_count: u32,
    ) -> anyhow::Result<Round> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO rounds (tournament_id, round_number, turns_count) VALUES (?1, ?2, ?3)",
            params![tournament_id, round_number, turns_count],
        )
        .with_context(|| {
            format!("could not create round {round_number} of tournament {tournament_id}")
        })?;
        Ok(Round {
            id: conn.last_insert_rowid(),
            tournament_id,
            round_number,
            turns_count,
        })
    }

    async fn rounds(&self, tournament_id: TournamentId) -> anyhow::Result<Vec<Round>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, tournament_id, round_number, turns_count
             FROM rounds WHERE tournament_id = ?1 ORDER BY round_number",
        )?;
        let rounds = stmt
            .query_map(params![tournament_id], round_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("could not read rounds of tournament {tournament_id}"))?;
        Ok(rounds)
    }

    async fn create_match(
        &self,
        round_id: RoundId,
        first: StrategyId,
        second: StrategyId,
    ) -> anyhow::Result<Match> {
        let conn = self.conn()?;
        let start_time = OffsetDateTime::now_utc();
        conn.execute(
            "INSERT INTO matches (round_id, strategy1_id, strategy2_id, start_time, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![round_id, first, second, start_time, Status::InProgress],
        )
        .with_context(|| format!("could not create match {first} VS {second} in round {round_id}"))?;
        Ok(Match {
            id: conn.last_insert_rowid(),
            round_id,
            strategies: [first, second],
            start_time,
            end_time: None,
            status: Status::InProgress,
        })
    }

    async fn match_record(&self, id: MatchId) -> anyhow::Result<Option<Match>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {MATCH_COLUMNS} FROM matches WHERE id = ?1"),
            params![id],
            match_from_row,
        )
        .optional()
        .with_context(|| format!("could not read match {id}"))
    }

    async fn matches(&self, round_id: RoundId) -> anyhow::Result<Vec<Match>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches WHERE round_id = ?1 ORDER BY id"
        ))?;
        let matches = stmt
            .query_map(params![round_id], match_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("could not read matches of round {round_id}"))?;
        Ok(matches)
    }

    async fn complete_match(&self, id: MatchId, end_time: OffsetDateTime) -> anyhow::Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE matches SET status = ?1, end_time = ?2 WHERE id = ?3 AND status = ?4",
            params![Status::Completed, end_time, id, Status::InProgress],
        )?;
        if updated == 0 {
            bail!("match {id} does not exist or is not in progress");
        }
        Ok(())
    }

    async fn record_turn(&self, match_id: MatchId, sides: [NewTurn; 2]) -> anyhow::Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let created_at = OffsetDateTime::now_utc();
        for turn in &sides {
            tx.execute(
                "INSERT INTO turns (match_id, turn_number, side, move, score, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    match_id,
                    turn.turn_number,
                    turn.side,
                    turn.choice,
                    turn.score,
                    created_at
                ],
            )
            .with_context(|| {
                format!(
                    "could not record turn {} of match {match_id} ({:?})",
                    turn.turn_number, turn.side
                )
            })?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn turns(&self, match_id: MatchId) -> anyhow::Result<Vec<Turn>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, match_id, turn_number, side, move, score, created_at
             FROM turns WHERE match_id = ?1 ORDER BY turn_number, side",
        )?;
        let turns = stmt
            .query_map(params![match_id], turn_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("could not read turns of match {match_id}"))?;
        Ok(turns)
    }
}

impl ToSql for Move {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(ValueRef::Text(self.as_str().as_bytes())))
    }
}

impl FromSql for Move {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for Side {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Owned(Value::Integer(i64::from(self.number()))))
    }
}

impl FromSql for Side {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let n = value.as_i64()?;
        u8::try_from(n)
            .ok()
            .and_then(Side::from_number)
            .ok_or(FromSqlError::OutOfRange(n))
    }
}

impl ToSql for Status {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(ValueRef::Text(self.as_str().as_bytes())))
    }
}

impl FromSql for Status {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let name = value.as_str()?;
        Status::from_name(name)
            .ok_or_else(|| FromSqlError::Other(format!("unknown status '{name}'").into()))
    }
}
