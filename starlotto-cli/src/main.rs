mod commands;
mod host;

use clap::{Parser, Subcommand};
use host::CliHost;
use starlotto_core::{EngineConfig, Participant, Stars, UserId};
use starlotto_engine::GameEngine;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "starlotto")]
#[command(about = "Star lottery - join the pool, one player takes 70%")]
#[command(version)]
struct Cli {
    /// Data directory for the game database
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Run against an in-memory demo store instead of the database
    #[arg(long, global = true)]
    in_memory: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current game and its players
    Status,
    /// Join the current game (starts one if none is open)
    Join {
        /// Your numeric user id
        #[arg(long)]
        user_id: i64,
        /// Display name shown to other players
        #[arg(long)]
        name: Option<String>,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Create a new game
    Create {
        /// Number of player slots
        max_players: u32,
        /// Entry fee in stars
        entry_fee: u64,
    },
    /// Draw the winner of a full game
    Draw {
        /// Game ID
        game_id: Uuid,
    },
    /// Show a participant's star balance and lifetime stats
    Balance {
        /// Numeric user id
        #[arg(long)]
        user_id: i64,
    },
    /// Stream live updates for a game until it completes
    Watch {
        /// Game ID
        game_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "starlotto={log},starlotto_engine={log},starlotto_core={log}",
            log = log_level
        )))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let data_dir = cli.data_dir.unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("starlotto")
    });

    // Storage mode is decided here, once, and injected everywhere else.
    let config = if cli.in_memory {
        EngineConfig::in_memory()
    } else {
        let mut config = EngineConfig::persistent(data_dir.join("starlotto.db"));
        config.starting_balance = Stars::new(100);
        config
    };
    let engine = GameEngine::with_config(config).await?;

    let result = match cli.command {
        Commands::Status => commands::show_status(&engine).await,
        Commands::Join { user_id, name, yes } => {
            let id = UserId::new(user_id);
            let participant =
                Participant::new(id, name.unwrap_or_else(|| format!("Player {user_id}")));
            let host = CliHost::new(participant, yes);
            commands::join(&engine, &host).await
        }
        Commands::Create {
            max_players,
            entry_fee,
        } => commands::create(&engine, max_players, entry_fee).await,
        Commands::Draw { game_id } => commands::draw(&engine, game_id).await,
        Commands::Balance { user_id } => {
            commands::show_balance(&engine, UserId::new(user_id)).await
        }
        Commands::Watch { game_id } => commands::watch(&engine, game_id).await,
    };

    if let Err(err) = result {
        tracing::debug!("Command failed: {err}");
        eprintln!("{}", err.user_message());
        std::process::exit(1);
    }

    Ok(())
}
