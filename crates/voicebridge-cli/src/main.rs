mod stub;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use voicebridge_admin::AdminState;
use voicebridge_core::config::Config;
use voicebridge_core::persistence::JsonCallStore;
use voicebridge_core::registry::ActiveCallRegistry;
use voicebridge_relay::{Collaborators, SessionDeps};

#[derive(Parser)]
#[command(
    name = "voicebridge",
    about = "Real-time telephony voice-agent gateway — PBX relay, VAD/endpointing, and the turn pipeline in a single binary",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the PBX relay and admin HTTP servers
    Serve {
        /// PBX relay port (overrides config)
        #[arg(long)]
        pbx_port: Option<u16>,

        /// Admin HTTP port (overrides config)
        #[arg(long)]
        admin_port: Option<u16>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show system status
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let config_path = cli
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let mut config = Config::load(&config_path)?;

    match cli.command {
        Commands::Serve { pbx_port, admin_port } => {
            if let Some(port) = pbx_port {
                config.pbx.get_or_insert_with(Default::default).port = port;
            }
            if let Some(port) = admin_port {
                config.admin.get_or_insert_with(Default::default).port = port;
            }

            let (warnings, errors) = config.validate();
            for w in &warnings {
                tracing::warn!("config: {w}");
            }
            if !errors.is_empty() {
                for e in &errors {
                    tracing::error!("config: {e}");
                }
                anyhow::bail!("invalid configuration, refusing to start");
            }

            run_serve(config).await?;
        }
        Commands::Status => {
            println!("voicebridge v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!("PBX port: {}", config.pbx_port());
            println!("Admin port: {}", config.admin_port());
            println!(
                "Agent service: {}",
                config.agent_service_url().unwrap_or("(none — embedded agent)")
            );
            println!("Status: not running");
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{value}"),
                None => anyhow::bail!("no such config key: {key}"),
            },
            ConfigAction::Set { key, value } => {
                let parsed: serde_json::Value =
                    serde_json::from_str(&value).unwrap_or_else(|_| serde_json::Value::String(value.clone()));
                config.set_path(&key, parsed)?;
                config.save(&config_path)?;
                println!("set {key}");
            }
        },
    }

    Ok(())
}

async fn run_serve(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let registry = ActiveCallRegistry::new();
    let call_store: Arc<dyn voicebridge_core::persistence::CallStore> =
        Arc::new(JsonCallStore::new(config.persistence_dir()));

    let collaborators = Arc::new(Collaborators {
        policy: Arc::new(stub::EchoPolicy),
        stt: Arc::new(stub::UnconfiguredStt),
        tts: Arc::new(stub::SilenceTts),
        vad: Arc::new(stub::PassThroughVad),
    });

    let session_deps = Arc::new(SessionDeps {
        config: config.clone(),
        collaborators: collaborators.clone(),
        call_store,
        registry: registry.clone(),
    });

    let admin_state = Arc::new(AdminState {
        registry,
        collaborators,
        sentence_min_words: config.sentence().min_words,
        tts_fallback_sample_rate: 16_000,
    });

    let pbx_bind = config.pbx_bind();
    let pbx_port = config.pbx_port();
    let admin_bind = config.admin_bind();
    let admin_port = config.admin_port();

    tracing::info!(pbx_port, admin_port, "starting voicebridge gateway");

    tokio::try_join!(
        voicebridge_relay::serve(&pbx_bind, pbx_port, session_deps),
        voicebridge_admin::serve(&admin_bind, admin_port, admin_state),
    )?;

    Ok(())
}
