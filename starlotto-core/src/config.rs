use crate::error::{LottoError, Result};
use crate::types::Stars;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which persistence backend to run against. Resolved once at startup
/// and injected; nothing else in the system inspects the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StorageMode {
    Persistent { db_path: PathBuf },
    InMemory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub storage_mode: StorageMode,
    /// Capacity of a game created when no waiting game exists.
    pub default_max_players: u32,
    /// Entry fee of a game created when no waiting game exists.
    pub default_entry_fee: Stars,
    /// Balance granted to a participant on first contact with the ledger.
    pub starting_balance: Stars,
}

impl EngineConfig {
    pub fn in_memory() -> Self {
        Self {
            storage_mode: StorageMode::InMemory,
            default_max_players: 10,
            default_entry_fee: Stars::new(1),
            // Demo default so an in-memory session is playable out of the box.
            starting_balance: Stars::new(100),
        }
    }

    pub fn persistent(db_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_mode: StorageMode::Persistent {
                db_path: db_path.into(),
            },
            default_max_players: 10,
            default_entry_fee: Stars::new(1),
            starting_balance: Stars::ZERO,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_max_players == 0 {
            return Err(LottoError::config("default_max_players must be positive"));
        }
        if self.default_entry_fee == Stars::ZERO {
            return Err(LottoError::config("default_entry_fee must be positive"));
        }
        Ok(())
    }
}
