use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "visor")]
#[command(about = "Visual understanding chat service — video event detection with conversational follow-up")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Show the resolved configuration
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, bind } => {
            let mut config = visor::config::load()?;
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if let Some(bind) = bind {
                config.gateway.bind = bind;
            }
            visor::gateway::run(config).await
        }
        Commands::Status => {
            let config = visor::config::load()?;
            println!("visor v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "gateway: {}:{}",
                config.gateway.bind, config.gateway.port
            );
            println!(
                "sessions: max_history={} timeout={}m sweep={}s",
                config.session.max_history,
                config.session.timeout_minutes,
                config.session.sweep_interval_secs
            );
            println!(
                "models: vision={} chat={} @ {}",
                config.models.vision.model, config.models.chat.model, config.models.base_url
            );
            println!(
                "video: max_frames={} max_duration={}s",
                config.video.max_frames, config.video.max_duration_secs
            );
            Ok(())
        }
    }
}
