//! Game lifecycle engine for the star lottery.
//!
//! Players pay a fixed entry fee into a shared pool; when the pool
//! fills, one player is drawn at random and receives 70% of the pool.
//! The engine owns every state transition (waiting -> full ->
//! completed) and talks to the persistence and payment collaborators
//! defined in `starlotto-core`.

pub mod engine;

pub use engine::GameEngine;
pub use starlotto_core::{
    EngineConfig, Game, GameStatus, GameUpdate, GameWatch, JoinedPlayer, LottoError, Participant,
    PlayerRecord, Result, Stars, StorageMode, UserId,
};
