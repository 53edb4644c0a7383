//! chatwire - headless realtime chat client
//!
//! This is the binary entry point. All logic lives in the library.

use std::path::PathBuf;

use clap::Parser;

use chatwire::app::config::init_config_dir;
use chatwire::headless::{run_headless, HeadlessOptions};

/// chatwire - headless realtime chat client
#[derive(Parser, Debug)]
#[command(name = "chatwire")]
#[command(about = "Log in, stay connected, and stream chat state as JSON lines", long_about = None)]
struct Args {
    /// Directory holding .chatwire/config.toml
    #[arg(long, value_name = "PATH")]
    dir: Option<PathBuf>,

    /// Login name or email
    #[arg(long, short = 'u')]
    identifier: Option<String>,

    /// Password (falls back to CHATWIRE_PASSWORD)
    #[arg(long, env = "CHATWIRE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Connect with an existing access token instead of logging in
    #[arg(long, conflicts_with = "identifier")]
    token: Option<String>,

    /// Room to join after connecting (repeatable)
    #[arg(long = "room", short = 'r')]
    rooms: Vec<String>,

    /// Override server.api_url
    #[arg(long)]
    api_url: Option<String>,

    /// Override server.socket_url
    #[arg(long)]
    socket_url: Option<String>,

    /// Write a default .chatwire/config.toml and exit
    #[arg(long)]
    init: bool,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let dir = args
        .dir
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    if args.init {
        init_config_dir(&dir)?;
        eprintln!("Wrote {}", dir.join(".chatwire/config.toml").display());
        return Ok(());
    }

    chatwire::core::logging::init()?;

    let result = run_headless(HeadlessOptions {
        dir,
        identifier: args.identifier,
        password: args.password,
        token: args.token,
        rooms: args.rooms,
        api_url: args.api_url,
        socket_url: args.socket_url,
    })
    .await;

    if result.is_err() {
        if let Ok(log_dir) = chatwire::core::logging::get_log_directory() {
            eprintln!("Logs: {}", log_dir.display());
        }
    }
    Ok(result?)
}
