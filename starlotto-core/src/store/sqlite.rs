use crate::error::{LottoError, Result};
use crate::store::{new_transaction_id, GameStore, GameWatch, JoinedPlayer, PaymentLedger};
use crate::types::{
    BalanceRecord, Game, GameStatus, GameUpdate, Participant, PaymentStatus, PlayerRecord, Stars,
    UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// SQLite-backed store and ledger. One connection behind an async
/// mutex; every multi-step mutation runs in a single transaction.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    events: broadcast::Sender<GameUpdate>,
    starting_balance: Stars,
}

impl SqliteBackend {
    pub async fn open(db_path: &Path, starting_balance: Stars) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                LottoError::storage_unavailable(format!("failed to create data directory: {e}"))
            })?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| LottoError::storage_unavailable(format!("cannot open database: {e}")))?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let backend = Self {
            conn: Mutex::new(conn),
            events,
            starting_balance,
        };

        backend.init_schema().await.map_err(|e| {
            LottoError::storage_unavailable(format!("cannot initialize schema: {e}"))
        })?;
        Ok(backend)
    }

    async fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS games (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                max_players INTEGER NOT NULL,
                entry_fee INTEGER NOT NULL,
                prize_pool INTEGER NOT NULL,
                winner_id INTEGER,
                created_at INTEGER NOT NULL,
                completed_at INTEGER
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS players (
                id TEXT PRIMARY KEY,
                game_id TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                display_name TEXT NOT NULL,
                joined_at INTEGER NOT NULL,
                payment_status TEXT NOT NULL,
                transaction_id TEXT,
                FOREIGN KEY (game_id) REFERENCES games(id),
                UNIQUE (game_id, user_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS balances (
                user_id INTEGER PRIMARY KEY,
                stars_balance INTEGER NOT NULL,
                total_spent INTEGER NOT NULL,
                total_won INTEGER NOT NULL,
                games_played INTEGER NOT NULL,
                games_won INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    fn emit(&self, update: GameUpdate) {
        // Best-effort: nobody listening is fine.
        let _ = self.events.send(update);
    }

    /// Create the ledger row if this participant is new. Must run
    /// before any balance mutation.
    fn ensure_balance_row(&self, conn: &Connection, user_id: UserId) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO balances
             (user_id, stars_balance, total_spent, total_won, games_played, games_won, updated_at)
             VALUES (?1, ?2, 0, 0, 0, 0, ?3)",
            params![
                user_id.raw(),
                self.starting_balance.amount() as i64,
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }
}

fn game_from_row(row: &Row<'_>) -> rusqlite::Result<Game> {
    let status: String = row.get(1)?;
    let status: GameStatus = status.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.into())
    })?;
    let id: String = row.get(0)?;
    let id = Uuid::parse_str(&id).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Game {
        id,
        status,
        max_players: row.get::<_, i64>(2)? as u32,
        entry_fee: Stars::new(row.get::<_, i64>(3)? as u64),
        prize_pool: Stars::new(row.get::<_, i64>(4)? as u64),
        winner_id: row.get::<_, Option<i64>>(5)?.map(UserId::new),
        created_at: millis_to_datetime(row.get(6)?),
        completed_at: row.get::<_, Option<i64>>(7)?.map(millis_to_datetime),
    })
}

fn player_from_row(row: &Row<'_>) -> rusqlite::Result<PlayerRecord> {
    let id: String = row.get(0)?;
    let game_id: String = row.get(1)?;
    let payment_status: String = row.get(5)?;
    let payment_status = match payment_status.as_str() {
        "pending" => PaymentStatus::Pending,
        "completed" => PaymentStatus::Completed,
        _ => PaymentStatus::Failed,
    };

    Ok(PlayerRecord {
        id: Uuid::parse_str(&id).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        game_id: Uuid::parse_str(&game_id).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?,
        user_id: UserId::new(row.get(2)?),
        display_name: row.get(3)?,
        joined_at: millis_to_datetime(row.get(4)?),
        payment_status,
        transaction_id: row.get(6)?,
    })
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

const GAME_COLUMNS: &str =
    "id, status, max_players, entry_fee, prize_pool, winner_id, created_at, completed_at";
const PLAYER_COLUMNS: &str =
    "id, game_id, user_id, display_name, joined_at, payment_status, transaction_id";

#[async_trait]
impl GameStore for SqliteBackend {
    async fn create_game(&self, max_players: u32, entry_fee: Stars) -> Result<Game> {
        if max_players == 0 {
            return Err(LottoError::config("max_players must be positive"));
        }
        if entry_fee == Stars::ZERO {
            return Err(LottoError::config("entry_fee must be positive"));
        }

        let game = Game {
            id: Uuid::new_v4(),
            status: GameStatus::Waiting,
            max_players,
            entry_fee,
            prize_pool: Stars::ZERO,
            winner_id: None,
            created_at: Utc::now(),
            completed_at: None,
        };

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO games (id, status, max_players, entry_fee, prize_pool, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![
                game.id.to_string(),
                game.status.as_str(),
                max_players as i64,
                entry_fee.amount() as i64,
                game.created_at.timestamp_millis(),
            ],
        )?;

        tracing::info!("Created game {} ({} player slots)", game.id, max_players);
        Ok(game)
    }

    async fn game(&self, game_id: Uuid) -> Result<Option<Game>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare(&format!("SELECT {GAME_COLUMNS} FROM games WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![game_id.to_string()], game_from_row)?;
        rows.next().transpose().map_err(Into::into)
    }

    async fn waiting_game(&self) -> Result<Option<Game>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {GAME_COLUMNS} FROM games WHERE status = 'waiting'
             ORDER BY created_at DESC, rowid DESC LIMIT 1"
        ))?;
        let mut rows = stmt.query_map([], game_from_row)?;
        rows.next().transpose().map_err(Into::into)
    }

    async fn insert_player(
        &self,
        game_id: Uuid,
        participant: &Participant,
        transaction_id: &str,
    ) -> Result<JoinedPlayer> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let game = {
            let mut stmt =
                tx.prepare(&format!("SELECT {GAME_COLUMNS} FROM games WHERE id = ?1"))?;
            let mut rows = stmt.query_map(params![game_id.to_string()], game_from_row)?;
            rows.next()
                .transpose()?
                .ok_or(LottoError::GameNotFound(game_id))?
        };

        match game.status {
            GameStatus::Waiting => {}
            GameStatus::Full => {
                return Err(LottoError::GameFull {
                    max_players: game.max_players,
                })
            }
            GameStatus::Completed => return Err(LottoError::GameNotJoinable(game_id)),
        }

        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM players WHERE game_id = ?1",
            params![game_id.to_string()],
            |row| row.get(0),
        )?;
        if count as u32 >= game.max_players {
            return Err(LottoError::GameFull {
                max_players: game.max_players,
            });
        }

        let already: i64 = tx.query_row(
            "SELECT COUNT(*) FROM players WHERE game_id = ?1 AND user_id = ?2",
            params![game_id.to_string(), participant.id.raw()],
            |row| row.get(0),
        )?;
        if already > 0 {
            return Err(LottoError::AlreadyJoined(participant.id));
        }

        let player = PlayerRecord {
            id: Uuid::new_v4(),
            game_id,
            user_id: participant.id,
            display_name: participant.display_name.clone(),
            joined_at: Utc::now(),
            payment_status: PaymentStatus::Completed,
            transaction_id: Some(transaction_id.to_string()),
        };

        tx.execute(
            "INSERT INTO players
             (id, game_id, user_id, display_name, joined_at, payment_status, transaction_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                player.id.to_string(),
                game_id.to_string(),
                player.user_id.raw(),
                player.display_name,
                player.joined_at.timestamp_millis(),
                player.payment_status.as_str(),
                player.transaction_id,
            ],
        )?;

        let new_count = count as u32 + 1;
        let new_status = if new_count >= game.max_players {
            GameStatus::Full
        } else {
            GameStatus::Waiting
        };
        let new_pool = game
            .prize_pool
            .checked_add(game.entry_fee)
            .ok_or_else(|| LottoError::internal("prize pool overflow"))?;

        tx.execute(
            "UPDATE games SET prize_pool = ?1, status = ?2 WHERE id = ?3",
            params![
                new_pool.amount() as i64,
                new_status.as_str(),
                game_id.to_string(),
            ],
        )?;
        tx.commit()?;

        let updated = Game {
            status: new_status,
            prize_pool: new_pool,
            ..game
        };

        tracing::info!(
            "Player {} joined game {} ({}/{} slots, pool {})",
            player.user_id,
            game_id,
            new_count,
            updated.max_players,
            updated.prize_pool,
        );

        self.emit(GameUpdate::PlayerJoined {
            game_id,
            player: player.clone(),
        });
        if new_status != game.status {
            self.emit(GameUpdate::StatusChanged {
                game_id,
                status: new_status,
            });
        }

        Ok(JoinedPlayer {
            player,
            game: updated,
        })
    }

    async fn list_players(&self, game_id: Uuid) -> Result<Vec<PlayerRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PLAYER_COLUMNS} FROM players
             WHERE game_id = ?1 ORDER BY joined_at ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![game_id.to_string()], player_from_row)?;

        let mut players = Vec::new();
        for player in rows {
            players.push(player?);
        }
        Ok(players)
    }

    async fn complete_game(
        &self,
        game_id: Uuid,
        winner_id: UserId,
        payout: Stars,
        completed_at: DateTime<Utc>,
    ) -> Result<Game> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let game = {
            let mut stmt =
                tx.prepare(&format!("SELECT {GAME_COLUMNS} FROM games WHERE id = ?1"))?;
            let mut rows = stmt.query_map(params![game_id.to_string()], game_from_row)?;
            rows.next()
                .transpose()?
                .ok_or(LottoError::GameNotFound(game_id))?
        };

        if game.status == GameStatus::Completed {
            return Err(LottoError::invalid_state(format!(
                "game {game_id} is already completed"
            )));
        }

        tx.execute(
            "UPDATE games SET status = 'completed', winner_id = ?1, completed_at = ?2
             WHERE id = ?3",
            params![
                winner_id.raw(),
                completed_at.timestamp_millis(),
                game_id.to_string(),
            ],
        )?;
        tx.commit()?;

        let updated = Game {
            status: GameStatus::Completed,
            winner_id: Some(winner_id),
            completed_at: Some(completed_at),
            ..game
        };

        self.emit(GameUpdate::StatusChanged {
            game_id,
            status: GameStatus::Completed,
        });
        self.emit(GameUpdate::GameCompleted {
            game_id,
            winner_id,
            payout,
        });

        Ok(updated)
    }

    fn subscribe(&self, game_id: Uuid) -> GameWatch {
        GameWatch::new(game_id, self.events.subscribe())
    }
}

#[async_trait]
impl PaymentLedger for SqliteBackend {
    async fn balance(&self, user_id: UserId) -> Result<Stars> {
        Ok(self.balance_record(user_id).await?.stars_balance)
    }

    async fn balance_record(&self, user_id: UserId) -> Result<BalanceRecord> {
        let conn = self.conn.lock().await;
        self.ensure_balance_row(&conn, user_id)?;

        let record = conn.query_row(
            "SELECT stars_balance, total_spent, total_won, games_played, games_won, updated_at
             FROM balances WHERE user_id = ?1",
            params![user_id.raw()],
            |row| {
                Ok(BalanceRecord {
                    user_id,
                    stars_balance: Stars::new(row.get::<_, i64>(0)? as u64),
                    total_spent: Stars::new(row.get::<_, i64>(1)? as u64),
                    total_won: Stars::new(row.get::<_, i64>(2)? as u64),
                    games_played: row.get::<_, i64>(3)? as u64,
                    games_won: row.get::<_, i64>(4)? as u64,
                    updated_at: millis_to_datetime(row.get(5)?),
                })
            },
        )?;
        Ok(record)
    }

    async fn charge(&self, user_id: UserId, amount: Stars) -> Result<String> {
        let conn = self.conn.lock().await;
        self.ensure_balance_row(&conn, user_id)?;

        // Conditional update keeps the balance from going negative even
        // under concurrent charges for the same participant.
        let changed = conn.execute(
            "UPDATE balances
             SET stars_balance = stars_balance - ?1,
                 total_spent = total_spent + ?1,
                 games_played = games_played + 1,
                 updated_at = ?2
             WHERE user_id = ?3 AND stars_balance >= ?1",
            params![
                amount.amount() as i64,
                Utc::now().timestamp_millis(),
                user_id.raw(),
            ],
        )?;

        if changed == 0 {
            let available: i64 = conn.query_row(
                "SELECT stars_balance FROM balances WHERE user_id = ?1",
                params![user_id.raw()],
                |row| row.get(0),
            )?;
            return Err(LottoError::InsufficientBalance {
                need: amount.amount(),
                available: available as u64,
            });
        }

        let txn_id = new_transaction_id();
        tracing::info!("Charged {} {} ({})", user_id, amount, txn_id);
        Ok(txn_id)
    }

    async fn credit(&self, user_id: UserId, amount: Stars) -> Result<String> {
        let conn = self.conn.lock().await;
        self.ensure_balance_row(&conn, user_id)?;

        conn.execute(
            "UPDATE balances
             SET stars_balance = stars_balance + ?1,
                 total_won = total_won + ?1,
                 games_won = games_won + 1,
                 updated_at = ?2
             WHERE user_id = ?3",
            params![
                amount.amount() as i64,
                Utc::now().timestamp_millis(),
                user_id.raw(),
            ],
        )?;

        let txn_id = new_transaction_id();
        tracing::info!("Credited {} {} ({})", user_id, amount, txn_id);
        Ok(txn_id)
    }

    async fn refund(&self, user_id: UserId, amount: Stars) -> Result<String> {
        let conn = self.conn.lock().await;
        self.ensure_balance_row(&conn, user_id)?;

        conn.execute(
            "UPDATE balances
             SET stars_balance = stars_balance + ?1,
                 total_spent = MAX(total_spent - ?1, 0),
                 games_played = MAX(games_played - 1, 0),
                 updated_at = ?2
             WHERE user_id = ?3",
            params![
                amount.amount() as i64,
                Utc::now().timestamp_millis(),
                user_id.raw(),
            ],
        )?;

        let txn_id = new_transaction_id();
        tracing::warn!("Refunded {} {} ({})", user_id, amount, txn_id);
        Ok(txn_id)
    }
}
