use crate::error::{LottoError, Result};
use crate::store::{new_transaction_id, GameStore, GameWatch, JoinedPlayer, PaymentLedger};
use crate::types::{
    BalanceRecord, Game, GameStatus, GameUpdate, Participant, PaymentStatus, PlayerRecord, Stars,
    UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    games: HashMap<Uuid, Game>,
    players: HashMap<Uuid, Vec<PlayerRecord>>,
    balances: HashMap<UserId, BalanceRecord>,
}

/// In-memory store and ledger for demo mode and tests. A single write
/// lock makes every join its own atomic step, the same guarantee the
/// SQLite backend gets from a transaction.
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
    events: broadcast::Sender<GameUpdate>,
    starting_balance: Stars,
}

impl MemoryBackend {
    pub fn new(starting_balance: Stars) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: RwLock::new(MemoryState::default()),
            events,
            starting_balance,
        }
    }

    fn emit(&self, update: GameUpdate) {
        let _ = self.events.send(update);
    }
}

impl MemoryState {
    fn balance_entry(&mut self, user_id: UserId, starting: Stars) -> &mut BalanceRecord {
        self.balances
            .entry(user_id)
            .or_insert_with(|| BalanceRecord::starting(user_id, starting))
    }
}

#[async_trait]
impl GameStore for MemoryBackend {
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

        let mut state = self.state.write();
        state.players.insert(game.id, Vec::new());
        state.games.insert(game.id, game.clone());

        tracing::info!("Created game {} ({} player slots)", game.id, max_players);
        Ok(game)
    }

    async fn game(&self, game_id: Uuid) -> Result<Option<Game>> {
        Ok(self.state.read().games.get(&game_id).cloned())
    }

    async fn waiting_game(&self) -> Result<Option<Game>> {
        let state = self.state.read();
        Ok(state
            .games
            .values()
            .filter(|g| g.status == GameStatus::Waiting)
            .max_by_key(|g| g.created_at)
            .cloned())
    }

    async fn insert_player(
        &self,
        game_id: Uuid,
        participant: &Participant,
        transaction_id: &str,
    ) -> Result<JoinedPlayer> {
        let mut state = self.state.write();

        let game = state
            .games
            .get(&game_id)
            .cloned()
            .ok_or(LottoError::GameNotFound(game_id))?;
        match game.status {
            GameStatus::Waiting => {}
            GameStatus::Full => {
                return Err(LottoError::GameFull {
                    max_players: game.max_players,
                })
            }
            GameStatus::Completed => return Err(LottoError::GameNotJoinable(game_id)),
        }

        let roster = state.players.entry(game_id).or_default();
        if roster.len() as u32 >= game.max_players {
            return Err(LottoError::GameFull {
                max_players: game.max_players,
            });
        }
        if roster.iter().any(|p| p.user_id == participant.id) {
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
        roster.push(player.clone());
        let new_count = roster.len() as u32;

        let game = state
            .games
            .get_mut(&game_id)
            .ok_or_else(|| LottoError::internal("game vanished mid-join"))?;
        game.prize_pool = game
            .prize_pool
            .checked_add(game.entry_fee)
            .ok_or_else(|| LottoError::internal("prize pool overflow"))?;
        let status_changed = new_count >= game.max_players;
        if status_changed {
            game.status = GameStatus::Full;
        }
        let updated = game.clone();
        drop(state);

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
        if status_changed {
            self.emit(GameUpdate::StatusChanged {
                game_id,
                status: GameStatus::Full,
            });
        }

        Ok(JoinedPlayer {
            player,
            game: updated,
        })
    }

    async fn list_players(&self, game_id: Uuid) -> Result<Vec<PlayerRecord>> {
        // Roster is append-only, so insertion order is join order.
        Ok(self
            .state
            .read()
            .players
            .get(&game_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn complete_game(
        &self,
        game_id: Uuid,
        winner_id: UserId,
        payout: Stars,
        completed_at: DateTime<Utc>,
    ) -> Result<Game> {
        let updated = {
            let mut state = self.state.write();
            let game = state
                .games
                .get_mut(&game_id)
                .ok_or(LottoError::GameNotFound(game_id))?;
            if game.status == GameStatus::Completed {
                return Err(LottoError::invalid_state(format!(
                    "game {game_id} is already completed"
                )));
            }
            game.status = GameStatus::Completed;
            game.winner_id = Some(winner_id);
            game.completed_at = Some(completed_at);
            game.clone()
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
impl PaymentLedger for MemoryBackend {
    async fn balance(&self, user_id: UserId) -> Result<Stars> {
        let mut state = self.state.write();
        Ok(state
            .balance_entry(user_id, self.starting_balance)
            .stars_balance)
    }

    async fn balance_record(&self, user_id: UserId) -> Result<BalanceRecord> {
        let mut state = self.state.write();
        Ok(state.balance_entry(user_id, self.starting_balance).clone())
    }

    async fn charge(&self, user_id: UserId, amount: Stars) -> Result<String> {
        let mut state = self.state.write();
        let record = state.balance_entry(user_id, self.starting_balance);

        let remaining = record
            .stars_balance
            .checked_sub(amount)
            .ok_or(LottoError::InsufficientBalance {
                need: amount.amount(),
                available: record.stars_balance.amount(),
            })?;

        record.stars_balance = remaining;
        record.total_spent = record
            .total_spent
            .checked_add(amount)
            .ok_or_else(|| LottoError::internal("total_spent overflow"))?;
        record.games_played += 1;
        record.updated_at = Utc::now();

        let txn_id = new_transaction_id();
        tracing::info!("Charged {} {} ({})", user_id, amount, txn_id);
        Ok(txn_id)
    }

    async fn credit(&self, user_id: UserId, amount: Stars) -> Result<String> {
        let mut state = self.state.write();
        let record = state.balance_entry(user_id, self.starting_balance);

        record.stars_balance = record
            .stars_balance
            .checked_add(amount)
            .ok_or_else(|| LottoError::internal("balance overflow"))?;
        record.total_won = record
            .total_won
            .checked_add(amount)
            .ok_or_else(|| LottoError::internal("total_won overflow"))?;
        record.games_won += 1;
        record.updated_at = Utc::now();

        let txn_id = new_transaction_id();
        tracing::info!("Credited {} {} ({})", user_id, amount, txn_id);
        Ok(txn_id)
    }

    async fn refund(&self, user_id: UserId, amount: Stars) -> Result<String> {
        let mut state = self.state.write();
        let record = state.balance_entry(user_id, self.starting_balance);

        record.stars_balance = record
            .stars_balance
            .checked_add(amount)
            .ok_or_else(|| LottoError::internal("balance overflow"))?;
        record.total_spent = record.total_spent.checked_sub(amount).unwrap_or(Stars::ZERO);
        record.games_played = record.games_played.saturating_sub(1);
        record.updated_at = Utc::now();

        let txn_id = new_transaction_id();
        tracing::warn!("Refunded {} {} ({})", user_id, amount, txn_id);
        Ok(txn_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_participant_gets_starting_balance() {
        let backend = MemoryBackend::new(Stars::new(100));
        assert_eq!(
            backend.balance(UserId::new(1)).await.unwrap(),
            Stars::new(100)
        );
    }

    #[tokio::test]
    async fn waiting_game_returns_most_recent() {
        let backend = MemoryBackend::new(Stars::ZERO);
        let _old = backend.create_game(2, Stars::new(1)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let newer = backend.create_game(2, Stars::new(1)).await.unwrap();

        let waiting = backend.waiting_game().await.unwrap().unwrap();
        assert_eq!(waiting.id, newer.id);
    }

    #[tokio::test]
    async fn capacity_is_enforced_at_last_slot() {
        let backend = MemoryBackend::new(Stars::ZERO);
        let game = backend.create_game(2, Stars::new(1)).await.unwrap();

        backend
            .insert_player(game.id, &Participant::new(UserId::new(1), "a"), "t1")
            .await
            .unwrap();
        let joined = backend
            .insert_player(game.id, &Participant::new(UserId::new(2), "b"), "t2")
            .await
            .unwrap();
        assert_eq!(joined.game.status, GameStatus::Full);

        let err = backend
            .insert_player(game.id, &Participant::new(UserId::new(3), "c"), "t3")
            .await
            .unwrap_err();
        assert!(matches!(err, LottoError::GameFull { max_players: 2 }));
        assert_eq!(backend.list_players(game.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn pool_tracks_completed_payments_exactly() {
        let backend = MemoryBackend::new(Stars::ZERO);
        let game = backend.create_game(5, Stars::new(3)).await.unwrap();

        for i in 0..3 {
            backend
                .insert_player(
                    game.id,
                    &Participant::new(UserId::new(i), format!("p{i}")),
                    "t",
                )
                .await
                .unwrap();
        }

        let game = backend.game(game.id).await.unwrap().unwrap();
        let players = backend.list_players(game.id).await.unwrap();
        let paid = players
            .iter()
            .filter(|p| p.payment_status == PaymentStatus::Completed)
            .count() as u64;
        assert_eq!(game.prize_pool, game.entry_fee.checked_mul(paid).unwrap());
        assert!(game.prize_pool <= game.pool_cap());
    }
}
