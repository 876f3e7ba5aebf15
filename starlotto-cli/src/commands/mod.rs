use comfy_table::{presets::UTF8_FULL, Table};
use starlotto_core::{Game, GameStatus, GameUpdate, Host, LottoError, Result, Stars};
use starlotto_engine::GameEngine;
use uuid::Uuid;

fn print_game(game: &Game, joined: usize) {
    println!("Game {}", game.id);
    println!("  Status:     {}", game.status.as_str());
    println!("  Players:    {}/{}", joined, game.max_players);
    println!("  Entry fee:  {}", game.entry_fee);
    println!("  Prize pool: {}", game.prize_pool);
    if let Some(winner_id) = game.winner_id {
        println!("  Winner:     {winner_id}");
    }
}

pub async fn show_status(engine: &GameEngine) -> Result<()> {
    let Some(game) = engine.current_game().await? else {
        println!("No open game. Join to start one, or run `starlotto create`.");
        return Ok(());
    };

    let players = engine.players(game.id).await?;
    print_game(&game, players.len());

    if players.is_empty() {
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["#", "Player", "Joined", "Payment"]);
    for (i, player) in players.iter().enumerate() {
        table.add_row(vec![
            (i + 1).to_string(),
            player.display_name.clone(),
            player.joined_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            player.payment_status.as_str().to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}

/// Join the current waiting game, creating one first if none exists.
pub async fn join(engine: &GameEngine, host: &dyn Host) -> Result<()> {
    let participant = host.current_participant();

    let game = match engine.current_game().await? {
        Some(game) => game,
        None => {
            let config = engine.config();
            let game = engine
                .create_game(config.default_max_players, config.default_entry_fee)
                .await?;
            host.notify(&format!(
                "Started a new game for {} players.",
                game.max_players
            ))
            .await;
            game
        }
    };

    let prompt = format!(
        "Join this game for {}? Your balance: {}",
        game.entry_fee,
        engine.balance(participant.id).await?,
    );
    if !host.confirm(&prompt).await {
        host.notify("Maybe next round.").await;
        return Ok(());
    }

    let joined = engine.join(game.id, &participant).await?;
    host.notify(&format!(
        "You're in! {} of {} slots taken, pool at {}.",
        engine.players(game.id).await?.len(),
        joined.game.max_players,
        joined.game.prize_pool,
    ))
    .await;

    if joined.game.status == GameStatus::Completed {
        let winner_id = joined
            .game
            .winner_id
            .ok_or_else(|| LottoError::internal("completed game without winner"))?;
        let payout = joined.game.prize_pool.winner_share();
        if winner_id == participant.id {
            host.notify(&format!("The game is full and you won {payout}!"))
                .await;
        } else {
            host.notify(&format!(
                "The game is full. Winner: {winner_id} ({payout})."
            ))
            .await;
        }
    }
    Ok(())
}

pub async fn create(engine: &GameEngine, max_players: u32, entry_fee: u64) -> Result<()> {
    let game = engine
        .create_game(max_players, Stars::new(entry_fee))
        .await?;
    print_game(&game, 0);
    Ok(())
}

pub async fn draw(engine: &GameEngine, game_id: Uuid) -> Result<()> {
    let game = engine.select_winner(game_id).await?;
    let winner_id = game
        .winner_id
        .ok_or_else(|| LottoError::internal("completed game without winner"))?;
    println!(
        "Winner: {} takes {} of the {} pool.",
        winner_id,
        game.prize_pool.winner_share(),
        game.prize_pool,
    );
    Ok(())
}

pub async fn show_balance(engine: &GameEngine, user_id: starlotto_core::UserId) -> Result<()> {
    match engine.balance_record(user_id).await {
        Ok(record) => {
            println!("Balance for {user_id}:");
            println!("  Stars:        {}", record.stars_balance);
            println!("  Total spent:  {}", record.total_spent);
            println!("  Total won:    {}", record.total_won);
            println!("  Games played: {}", record.games_played);
            println!("  Games won:    {}", record.games_won);
            Ok(())
        }
        Err(err) if err.is_storage_unavailable() => {
            // Offline fallback: show the demo balance instead of failing.
            let fallback = engine.config().starting_balance;
            println!("Balance service unavailable; showing demo balance: {fallback}");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Stream change notifications for a game until it completes.
pub async fn watch(engine: &GameEngine, game_id: Uuid) -> Result<()> {
    let game = engine
        .game(game_id)
        .await?
        .ok_or(LottoError::GameNotFound(game_id))?;
    if game.status == GameStatus::Completed {
        print_game(&game, engine.players(game_id).await?.len());
        return Ok(());
    }

    let mut watch = engine.subscribe(game_id);
    println!("Watching game {game_id} (ctrl-c to stop)...");

    while let Some(update) = watch.next().await {
        match update {
            GameUpdate::PlayerJoined { player, .. } => {
                println!("{} joined", player.display_name);
            }
            GameUpdate::StatusChanged { status, .. } => {
                println!("Game is now {}", status.as_str());
            }
            GameUpdate::GameCompleted {
                winner_id, payout, ..
            } => {
                println!("Winner: {winner_id} takes {payout}");
                break;
            }
        }
    }
    watch.close();
    Ok(())
}
