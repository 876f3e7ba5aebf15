//! Core contracts and storage backends for the star lottery.
//!
//! Defines the data model, the persistence and payment collaborator
//! traits, and two backends: SQLite for durable state and an in-memory
//! store for demo mode and tests. The game lifecycle itself lives in
//! `starlotto-engine`.

pub mod config;
pub mod error;
pub mod host;
pub mod store;
pub mod types;

pub use config::{EngineConfig, StorageMode};
pub use error::{LottoError, Result};
pub use host::Host;
pub use store::{GameStore, GameWatch, JoinedPlayer, MemoryBackend, PaymentLedger, SqliteBackend};
pub use types::{
    BalanceRecord, Game, GameStatus, GameUpdate, Participant, PaymentStatus, PlayerRecord, Stars,
    UserId,
};
