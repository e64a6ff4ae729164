use anyhow::{anyhow, Result};
use astminer::{
    app::AppStateBuilder,
    backend::Backends,
    config::Config,
    ticket::TicketRef,
    version,
};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "astminer", version, about = "Turns telephony call events into tickets")]
struct Cli {
    /// Path to the configuration file
    #[clap(long)]
    conf: Option<String>,

    /// Print build information and exit
    #[clap(long)]
    build_info: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration and list its template sections
    CheckConfig,
    /// Fetch one ticket from the configured backend and print it as JSON
    ShowTicket { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    if cli.build_info {
        println!("{}", version::get_version_info());
        return Ok(());
    }

    let config = match cli.conf {
        Some(ref conf) => Config::load(conf)?,
        None => Config::default(),
    };

    match cli.command {
        Some(Command::CheckConfig) => check_config(&config),
        Some(Command::ShowTicket { id }) => show_ticket(&config, id).await,
        None => serve(config).await,
    }
}

fn check_config(config: &Config) -> Result<()> {
    Backends::from_config(&config.backend)?;
    println!("configuration ok");
    for name in config.templates.section_names() {
        let fields = config
            .templates
            .section(name)
            .map(|section| section.len())
            .unwrap_or(0);
        println!("  [{}] {} field(s)", name, fields);
    }
    for name in config.templates.unknown_sections() {
        println!("  warning: [{}] is never applied", name);
    }
    Ok(())
}

async fn show_ticket(config: &Config, id: String) -> Result<()> {
    let backends = Backends::from_config(&config.backend)?;
    let ticket = backends.tickets.find(&TicketRef(id)).await?;
    println!("{}", serde_json::to_string_pretty(&ticket)?);
    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let filter = EnvFilter::try_new(config.log_filter())?;
    let log_fmt = tracing_subscriber::fmt().with_env_filter(filter);

    // keeps the non-blocking writer flushing until main returns
    let _guard = match config.log_file {
        Some(ref log_file) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file)
                .map_err(|e| anyhow!("{}: {}", log_file, e))?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            log_fmt.with_writer(non_blocking).try_init().ok();
            Some(guard)
        }
        None => {
            log_fmt.try_init().ok();
            None
        }
    };

    let token = CancellationToken::new();
    let app = AppStateBuilder::new()
        .config(config)
        .token(token.clone())
        .build()?;

    info!(
        "Starting astminer {} on {}",
        version::get_short_version(),
        app.state.config.http_addr
    );
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received CTRL+C, shutting down");
            token.cancel();
        }
    });
    app.run().await
}
