use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;

use chanbot::application::errors::{BotError, StorageError};
use chanbot::application::messaging::LoggingMiddleware;
use chanbot::application::services::BotSession;
use chanbot::domain::traits::Transport;
use chanbot::infrastructure::adapters::{ConsoleTransport, IrcClient};
use chanbot::infrastructure::config::Config;
use chanbot::infrastructure::database::Database;
use chanbot::infrastructure::gist::GistClient;
use chanbot::infrastructure::status::HelixStatus;

#[derive(Parser)]
#[command(name = "chanbot")]
#[command(about = "A Twitch chat bot with per-channel text commands", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to chat and serve the configured channels
    Run,
    /// Chat with the bot from the terminal
    Console {
        /// Channel the lines are posted in
        #[arg(long, default_value = "#console")]
        channel: String,
        /// Nick the lines are posted as. It is a mod of the channel.
        #[arg(long, default_value = "console")]
        nick: String,
    },
    /// Show version
    Version,
    /// Generate default config
    InitConfig,
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            let config = load_config(&cli.config);
            if let Err(e) = config.validate() {
                tracing::error!("Invalid config: {}", e);
                std::process::exit(1);
            }
            block_on(run_bot(config));
        }
        Commands::Console { channel, nick } => {
            let config = load_config(&cli.config);
            block_on(run_console(config, channel, nick));
        }
        Commands::Version => {
            println!("chanbot v{}", env!("CARGO_PKG_VERSION"));
        }
        Commands::InitConfig => {
            init_config();
        }
    }
}

fn load_config(config_path: &str) -> Config {
    if Path::new(config_path).exists() {
        Config::load(config_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config: {}, using defaults", e);
            Config::load_env()
        })
    } else {
        Config::load_env()
    }
}

fn block_on<F>(future: F)
where
    F: std::future::Future<Output = Result<(), BotError>>,
{
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(future) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run_bot(config: Config) -> Result<(), BotError> {
    tracing::info!("Starting {}", config.bot.name);

    let db = Database::new(&config.database.path).map_err(StorageError::from)?;
    tracing::info!("Database initialized at {}", config.database.path.display());

    let (client, events) = IrcClient::connect_with(
        &config.twitch.server,
        config.twitch.port,
        &config.twitch.user,
        &config.twitch.oauth,
        config.twitch.reconnect(),
    )
    .await?;

    let transport: Arc<dyn Transport> = client.clone();
    let session = build_session(&config, transport, db)?;
    session.ignore(config.twitch.ignore.iter().cloned()).await?;

    session.run(events, config.twitch.channels.clone()).await;
    client.shutdown();
    tracing::info!("Bye");
    Ok(())
}

async fn run_console(config: Config, channel: String, nick: String) -> Result<(), BotError> {
    tracing::info!("Starting console bot (dev mode)");

    let db = Database::in_memory().map_err(StorageError::from)?;
    let transport: Arc<dyn Transport> = Arc::new(ConsoleTransport::new(config.bot.name.as_str()));

    // No gist publishing or message decoration on the console
    let mut config = config;
    config.gist.token = None;
    config.twitch.is_mod = true;
    let session = build_session(&config, transport, db)?;

    session.join(&channel).await?;
    session.channel(&channel).add_mod(&nick).await?;
    tracing::info!("Chatting in {} as {}, Ctrl-D to quit", channel, nick);

    session.run(ConsoleTransport::read_events(&channel, &nick), Vec::new()).await;
    Ok(())
}

fn build_session(config: &Config, transport: Arc<dyn Transport>, db: Database) -> Result<BotSession, BotError> {
    let mut builder = BotSession::builder(transport, Box::new(db))
        .bot_name(config.bot.name.as_str())
        .prefix(config.bot.prefix.as_str())
        .case_sensitive(config.bot.case_sensitive)
        .is_mod(config.twitch.is_mod)
        .with_rate_limiter(config.rate_limit.limiter(config.twitch.is_mod))
        .with_middleware(LoggingMiddleware);

    if let Some(token) = &config.gist.token {
        let mut gist = GistClient::new(token.as_str()).with_public(config.gist.public);
        if let Some(api_url) = &config.gist.api_url {
            gist = gist.with_api_url(api_url.as_str());
        }
        builder = builder.with_publisher(Arc::new(gist));
    } else {
        tracing::info!("No gist token configured, command lists won't be published");
    }

    if let Some(client_id) = &config.status.client_id {
        let mut status = HelixStatus::new(client_id.as_str());
        if let Some(api_url) = &config.status.api_url {
            status = status.with_api_url(api_url.as_str());
        }
        if let Some(token) = &config.status.token {
            status = status.with_token(token.as_str());
        }
        builder = builder.with_status(Arc::new(status));
    }

    builder.build()
}

fn init_config() {
    match Config::default().to_yaml() {
        Ok(yaml) => {
            println!("{}", yaml);
            println!("\nSave this to config.yaml and adjust as needed.");
        }
        Err(e) => tracing::error!("{}", e),
    }
}
