pub mod memory;
pub mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use crate::error::Result;
use crate::types::{Game, GameUpdate, Participant, PlayerRecord, Stars, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Result of an atomic join: the inserted record plus the game as it
/// stands after the insert (pool bumped, possibly flipped to Full).
#[derive(Debug, Clone)]
pub struct JoinedPlayer {
    pub player: PlayerRecord,
    pub game: Game,
}

/// Durable store for games and their player records.
///
/// `insert_player` is the concurrency boundary: it re-checks status,
/// capacity, and uniqueness in the same atomic step as the insert, so
/// two joins racing at the last slot cannot both succeed.
#[async_trait]
pub trait GameStore: Send + Sync {
    async fn create_game(&self, max_players: u32, entry_fee: Stars) -> Result<Game>;

    async fn game(&self, game_id: Uuid) -> Result<Option<Game>>;

    /// Most recently created game still in `Waiting`, if any.
    async fn waiting_game(&self) -> Result<Option<Game>>;

    async fn insert_player(
        &self,
        game_id: Uuid,
        participant: &Participant,
        transaction_id: &str,
    ) -> Result<JoinedPlayer>;

    /// Player records ordered by `joined_at` ascending.
    async fn list_players(&self, game_id: Uuid) -> Result<Vec<PlayerRecord>>;

    /// Terminal transition. Fails if the game is already completed.
    async fn complete_game(
        &self,
        game_id: Uuid,
        winner_id: UserId,
        payout: Stars,
        completed_at: DateTime<Utc>,
    ) -> Result<Game>;

    /// Best-effort change notifications for one game.
    fn subscribe(&self, game_id: Uuid) -> GameWatch;
}

/// Ledger holding every participant's spendable stars and lifetime
/// totals. All money movement goes through this contract; the engine
/// never writes a balance row directly.
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    /// Current balance; unknown participants get the configured
    /// starting balance rather than an error.
    async fn balance(&self, user_id: UserId) -> Result<Stars>;

    /// Full ledger row for the participant, created lazily.
    async fn balance_record(&self, user_id: UserId) -> Result<crate::types::BalanceRecord>;

    /// Atomically deduct `amount`; fails with `InsufficientBalance`
    /// rather than letting the balance go negative. Bumps
    /// `total_spent` and `games_played`. Returns a transaction id.
    async fn charge(&self, user_id: UserId, amount: Stars) -> Result<String>;

    /// Winner payout. Bumps balance, `total_won`, and `games_won`.
    async fn credit(&self, user_id: UserId, amount: Stars) -> Result<String>;

    /// Compensating transaction: reverses a charge whose join lost the
    /// insert race. Restores the balance and the lifetime counters.
    async fn refund(&self, user_id: UserId, amount: Stars) -> Result<String>;
}

fn new_transaction_id() -> String {
    format!("txn_{}", Uuid::new_v4().simple())
}

/// Subscription handle for one game's change feed.
///
/// Dropping the handle unsubscribes; `close` does the same explicitly
/// and is idempotent.
pub struct GameWatch {
    game_id: Uuid,
    rx: Option<broadcast::Receiver<GameUpdate>>,
}

impl GameWatch {
    pub(crate) fn new(game_id: Uuid, rx: broadcast::Receiver<GameUpdate>) -> Self {
        Self {
            game_id,
            rx: Some(rx),
        }
    }

    pub fn game_id(&self) -> Uuid {
        self.game_id
    }

    /// Next update for the watched game, or `None` once the watch is
    /// closed or the store has gone away. Updates missed under lag are
    /// skipped; the feed is best-effort by contract.
    pub async fn next(&mut self) -> Option<GameUpdate> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.recv().await {
                Ok(update) if update.game_id() == self.game_id => return Some(update),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Game watch lagged, skipped {} updates", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    pub fn close(&mut self) {
        self.rx = None;
    }

    pub fn is_closed(&self) -> bool {
        self.rx.is_none()
    }
}
