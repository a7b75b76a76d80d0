mod config;
use clap::{Parser, Subcommand};
use config::Config;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod server;
use icey_core::CodeIssuer;
use server::{code_store_builder, run_server};

#[derive(Parser)]
#[command(name = "icey")]
#[command(about = "Verified content records with bounded trust voting")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Server {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
    /// Issue a verification code for a subject phrase
    IssueCode {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,

        /// Phrase the subject hash is derived from
        #[arg(short, long)]
        subject: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "icey=info,icey_core=info,icey_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config } => {
            tracing::info!("Starting Icey server with config: {}", config);

            let cfg = load_config(&config);

            tracing::info!(
                "Bind: {}, Repository: {} ({}), Code store: {}",
                cfg.server.bind_addr,
                cfg.repository.sharding().store_dir().display(),
                cfg.repository.backend.as_str(),
                cfg.code_store.backend.as_str()
            );

            if let Err(e) = run_server(cfg).await {
                tracing::error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::IssueCode { config, subject } => {
            let cfg = load_config(&config);

            let store = match code_store_builder(&cfg).build().await {
                Ok(store) => store,
                Err(e) => {
                    tracing::error!("Failed to open code store: {}", e);
                    std::process::exit(1);
                }
            };

            let issuer = CodeIssuer::new(store, cfg.verification.code_ttl());
            match issuer.issue(&subject).await {
                Ok(issued) => {
                    println!("subject: {}", issued.subject);
                    println!("code: {}", issued.code);
                }
                Err(e) => {
                    tracing::error!("Failed to issue code: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}

fn load_config(path: &str) -> Config {
    match Config::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    }
}
