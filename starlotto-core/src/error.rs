use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, LottoError>;

#[derive(Error, Debug)]
pub enum LottoError {
    #[error("Game {0} is not accepting players")]
    GameNotJoinable(Uuid),

    #[error("Game is full ({max_players} players)")]
    GameFull { max_players: u32 },

    #[error("User {0} already joined this game")]
    AlreadyJoined(crate::types::UserId),

    #[error("Insufficient balance: need {need} stars, have {available} stars")]
    InsufficientBalance { need: u64, available: u64 },

    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    #[error("Payout failed: {0}")]
    PayoutFailed(String),

    #[error("Game {0} has no players")]
    NoPlayers(Uuid),

    #[error("Game not found: {0}")]
    GameNotFound(Uuid),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid game state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LottoError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn storage_unavailable(msg: impl Into<String>) -> Self {
        Self::StorageUnavailable(msg.into())
    }

    pub fn payment_failed(msg: impl Into<String>) -> Self {
        Self::PaymentFailed(msg.into())
    }

    /// True when the caller can fall back to an offline/demo view
    /// instead of surfacing the failure to the user.
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }

    /// Human-readable rejection shown to the participant.
    pub fn user_message(&self) -> String {
        match self {
            Self::GameNotJoinable(_) => "This game is no longer accepting players.".into(),
            Self::GameFull { .. } => "The game is full. Wait for the next round.".into(),
            Self::AlreadyJoined(_) => "You already joined this game.".into(),
            Self::InsufficientBalance { need, .. } => {
                format!("You don't have enough stars. Joining costs {need} stars.")
            }
            Self::PaymentFailed(_) => "Payment failed. You were not charged.".into(),
            Self::PayoutFailed(_) => "Payout failed. The draw will be retried.".into(),
            Self::NoPlayers(_) => "Nobody has joined this game yet.".into(),
            Self::GameNotFound(_) => "That game does not exist.".into(),
            _ => "Something went wrong. Please try again later.".into(),
        }
    }
}
