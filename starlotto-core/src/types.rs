use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Star amount. Integer currency, no fractional stars exist.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Stars(u64);

impl Stars {
    pub const ZERO: Stars = Stars(0);

    pub const fn new(amount: u64) -> Self {
        Stars(amount)
    }

    pub fn amount(self) -> u64 {
        self.0
    }

    pub fn checked_add(self, other: Stars) -> Option<Stars> {
        self.0.checked_add(other.0).map(Stars)
    }

    pub fn checked_sub(self, other: Stars) -> Option<Stars> {
        self.0.checked_sub(other.0).map(Stars)
    }

    pub fn checked_mul(self, count: u64) -> Option<Stars> {
        self.0.checked_mul(count).map(Stars)
    }

    /// Winner's share of a prize pool: 70%, rounded down.
    /// The remaining 30% is the organizer share and never enters a record.
    pub fn winner_share(self) -> Stars {
        // Widen before multiplying; the share of any u64 pool fits back.
        Stars((self.0 as u128 * 7 / 10) as u64)
    }
}

impl std::fmt::Display for Stars {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} stars", self.0)
    }
}

/// External participant identity (numeric id from the host platform).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    pub const fn new(id: i64) -> Self {
        UserId(id)
    }

    pub fn raw(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A participant as reported by the host: identity plus display name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: UserId,
    pub display_name: String,
}

impl Participant {
    pub fn new(id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}

/// Game lifecycle state. Forward-only: Waiting -> Full -> Completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Waiting,
    Full,
    Completed,
}

impl GameStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GameStatus::Waiting => "waiting",
            GameStatus::Full => "full",
            GameStatus::Completed => "completed",
        }
    }
}

impl std::str::FromStr for GameStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(GameStatus::Waiting),
            "full" => Ok(GameStatus::Full),
            "completed" => Ok(GameStatus::Completed),
            other => Err(format!("unknown game status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: Uuid,
    pub status: GameStatus,
    pub max_players: u32,
    pub entry_fee: Stars,
    pub prize_pool: Stars,
    pub winner_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Game {
    pub fn is_joinable(&self) -> bool {
        self.status == GameStatus::Waiting
    }

    /// Upper bound on the pool; the accumulator must never cross it.
    pub fn pool_cap(&self) -> Stars {
        self.entry_fee
            .checked_mul(self.max_players as u64)
            .unwrap_or(Stars::new(u64::MAX))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }
}

/// One participant's membership in one game. Created only after the
/// entry fee charge succeeded; `(game_id, user_id)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: Uuid,
    pub game_id: Uuid,
    pub user_id: UserId,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
    pub payment_status: PaymentStatus,
    pub transaction_id: Option<String>,
}

/// Per-participant ledger row, shared across all games. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub user_id: UserId,
    pub stars_balance: Stars,
    pub total_spent: Stars,
    pub total_won: Stars,
    pub games_played: u64,
    pub games_won: u64,
    pub updated_at: DateTime<Utc>,
}

impl BalanceRecord {
    pub fn starting(user_id: UserId, stars_balance: Stars) -> Self {
        Self {
            user_id,
            stars_balance,
            total_spent: Stars::ZERO,
            total_won: Stars::ZERO,
            games_played: 0,
            games_won: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Best-effort change notification pushed to subscribers of a game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GameUpdate {
    PlayerJoined {
        game_id: Uuid,
        player: PlayerRecord,
    },
    StatusChanged {
        game_id: Uuid,
        status: GameStatus,
    },
    GameCompleted {
        game_id: Uuid,
        winner_id: UserId,
        payout: Stars,
    },
}

impl GameUpdate {
    pub fn game_id(&self) -> Uuid {
        match self {
            GameUpdate::PlayerJoined { game_id, .. }
            | GameUpdate::StatusChanged { game_id, .. }
            | GameUpdate::GameCompleted { game_id, .. } => *game_id,
        }
    }
}
