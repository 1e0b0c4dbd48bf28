//! # Plaza example
//!
//! Walk around a shared plaza from the terminal and chat with whoever else is
//! there.
//!
//! ## Host a room
//!
//! ```sh
//! cargo run --example plaza host
//! ```
//!
//! ## Join a room
//!
//! ```sh
//! cargo run --example plaza join <room> --peer <endpoint-id>
//! ```
//!
//! Type `w`, `a`, `s` or `d` to step, `/say <text>` (or any other line) to
//! chat, `/who` to list players, `/name <name>` to rename yourself and
//! `/quit` to leave.

use std::{
    io::{self, Write},
    path::PathBuf,
};

use anyhow::Result;
use clap::Parser;
use iroh::EndpointId;
use p2p_plaza::{
    CharacterPreset, Config, GameEvent, GameRoom, Iroh, PresetStore, transport::GossipConnector,
};
use tokio_util::io::ReaderStream;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory for the endpoint key and the saved character preset.
    #[arg(long)]
    data: Option<PathBuf>,
    /// TOML file overriding session and game settings.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Display name; saved with the character preset.
    #[arg(long)]
    name: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Host a new room
    Host,
    /// Join an existing room
    Join {
        /// The room id shared by the host
        room: String,
        /// Endpoint id of someone already in the room
        #[arg(long)]
        peer: Vec<EndpointId>,
    },
}

fn direction(key: &str) -> Option<(f64, f64)> {
    match key {
        "w" => Some((0.0, -1.0)),
        "a" => Some((-1.0, 0.0)),
        "s" => Some((0.0, 1.0)),
        "d" => Some((1.0, 0.0)),
        _ => None,
    }
}

fn print_event(event: &GameEvent, room: &GameRoom) {
    match event {
        GameEvent::StatusChanged(status) => println!("\n[{status}]"),
        GameEvent::PlayerJoined(id) => {
            let name = room.state().player(id).map(|p| p.display_name.clone());
            println!("\n{} joined", name.as_deref().unwrap_or(id));
        }
        GameEvent::PlayerLeft(id) => println!("\n{id} left"),
        GameEvent::ChatReceived(line) => println!("\n<{}> {}", line.display_name, line.text),
        GameEvent::Error(e) => eprintln!("\nError: {e}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();

    let scratch = tempfile::tempdir()?;
    let data_path = cli.data.unwrap_or_else(|| scratch.path().to_path_buf());
    tokio::fs::create_dir_all(&data_path).await?;
    let config = match &cli.config {
        Some(path) => Config::load(path).await?,
        None => Config::default(),
    };

    let presets = PresetStore::new(&data_path);
    let mut preset: CharacterPreset = presets.load().await?.unwrap_or_default();
    if let Some(name) = cli.name {
        preset.display_name = name;
        presets.save(&preset).await?;
    }

    let iroh = Iroh::new(data_path.clone()).await?;
    println!("Endpoint id: {}", iroh.id());

    // --- Setup Room ---
    let (room, mut events) = match cli.command {
        Commands::Host => {
            let connector = GossipConnector::new(iroh.clone());
            let (room, events) = GameRoom::create(connector, config, preset).await?;
            println!("Room hosted! Share: {}", room.id().query());
            println!("Others join with: plaza join {} --peer {}", room.id(), iroh.id());
            (room, events)
        }
        Commands::Join { room, peer } => {
            let connector = GossipConnector::new(iroh.clone()).with_bootstrap(peer);
            let (room, events) = GameRoom::join(connector, &room, config, preset).await?;
            println!("Joined room {}", room.id());
            (room, events)
        }
    };

    // --- Event Loop ---
    let mut stdin = ReaderStream::new(tokio::io::stdin());

    loop {
        print!("> ");
        io::stdout().flush()?;

        tokio::select! {
            Some(Ok(input)) = futures::StreamExt::next(&mut stdin) => {
                let line = String::from_utf8(input.to_vec())?.trim().to_string();
                if line.is_empty() {
                    continue;
                }

                if let Some((dx, dy)) = direction(&line) {
                    if !room.step(dx, dy).await? {
                        println!("Something is in the way.");
                    }
                    continue;
                }

                match line.split_once(' ').unwrap_or((line.as_str(), "")) {
                    ("/quit", _) => break,
                    ("/who", _) => {
                        for player in room.players() {
                            println!("{} @ ({:.0}, {:.0})", player.display_name, player.x, player.y);
                        }
                    }
                    ("/name", name) if !name.trim().is_empty() => {
                        let mut preset = presets.load().await?.unwrap_or_default();
                        preset.display_name = name.trim().to_string();
                        presets.save(&preset).await?;
                        room.apply_preset(preset).await?;
                    }
                    ("/say", text) => room.send_chat(text).await?,
                    _ => room.send_chat(&line).await?,
                }
            }

            Some(event) = events.recv() => print_event(&event, &room),

            else => break,
        }
    }

    println!("Leaving room...");
    room.leave().await?;
    iroh.shutdown().await?;
    Ok(())
}
