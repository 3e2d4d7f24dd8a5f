use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

use beacon_reply::channels::{ChannelRegistry, ConsoleChannel, IncomingMessage};
use beacon_reply::delivery::send_to_session;
use beacon_reply::session::{MemorySessionStore, SessionKey, SessionStore, SqliteSessionStore};
use beacon_reply::{Config, EchoEngine, ReplyDispatcher};

/// Beacon Reply - session reply scheduler for chat channels
#[derive(Parser)]
#[command(name = "beacon-reply", version, about)]
struct Cli {
    /// Path to a TOML config file (defaults to ~/.config/omni/beacon/reply.toml)
    #[arg(short, long, env = "BEACON_REPLY_CONFIG")]
    config: Option<PathBuf>,

    /// Agent id used in session keys
    #[arg(short, long, env = "BEACON_REPLY_AGENT")]
    agent: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Keep sessions in memory instead of the session database
    #[arg(long)]
    memory: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Read messages from stdin and print replies (default)
    Chat {
        /// Chat id for the console conversation
        #[arg(long, default_value = "local")]
        chat: String,

        /// Simulated engine latency in milliseconds
        #[arg(long, default_value = "0")]
        delay_ms: u64,
    },
    /// Send text to the last route of a stored session
    Send {
        /// Session key (e.g. agent:main:console:direct:local)
        session: String,
        /// Text to send
        text: String,
    },
    /// List stored session keys
    Sessions,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,beacon_reply=info",
        1 => "info,beacon_reply=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(agent) = cli.agent {
        config.dispatch.agent_id = agent;
    }

    let sqlite = if cli.memory {
        None
    } else {
        Some(Arc::new(SqliteSessionStore::open(&config.database_path)?))
    };
    let store: Arc<dyn SessionStore> = match &sqlite {
        Some(sqlite) => Arc::clone(sqlite) as Arc<dyn SessionStore>,
        None => Arc::new(MemorySessionStore::new()),
    };

    let mut registry = ChannelRegistry::new();
    registry.register(Arc::new(ConsoleChannel::new()));
    let channels = Arc::new(registry);

    match cli.command.unwrap_or(Command::Chat {
        chat: "local".to_string(),
        delay_ms: 0,
    }) {
        Command::Chat { chat, delay_ms } => {
            let engine = Arc::new(EchoEngine::new().with_delay(Duration::from_millis(delay_ms)));
            let dispatcher = ReplyDispatcher::new(config.dispatch, engine, store, channels);
            chat_loop(dispatcher, &chat).await
        }
        Command::Send { session, text } => {
            let key = SessionKey::new(session);
            let result = send_to_session(store.as_ref(), channels.as_ref(), &key, &text).await;
            if result.ok {
                Ok(())
            } else {
                anyhow::bail!(result.error.unwrap_or_else(|| "send failed".to_string()))
            }
        }
        Command::Sessions => {
            let Some(sqlite) = sqlite else {
                println!("no stored sessions (in-memory store)");
                return Ok(());
            };
            for key in sqlite.keys()? {
                println!("{key}");
            }
            Ok(())
        }
    }
}

/// Feed stdin lines through the dispatcher until EOF
///
/// Each line is dispatched on its own task so messages typed while a reply
/// is pending exercise the queue policy.
async fn chat_loop(dispatcher: Arc<ReplyDispatcher>, chat: &str) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = JoinSet::new();
    let mut key = None;

    while let Some(line) = lines.next_line().await? {
        let content = line.trim();
        if content.is_empty() {
            continue;
        }
        let message = IncomingMessage::direct("console", chat, content);
        key.get_or_insert_with(|| dispatcher.session_key(&message));

        let dispatcher = Arc::clone(&dispatcher);
        tasks.spawn(async move {
            if let Err(e) = dispatcher.handle_inbound(message).await {
                tracing::warn!(error = %e, "failed to handle message");
            }
        });
    }

    while tasks.join_next().await.is_some() {}

    // Let queued follow-ups finish before exiting
    if let Some(key) = key {
        while dispatcher.runner().is_active(&key) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
    Ok(())
}
