use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nightscout_mcp_runtime::config::ConnectionArgs;
use nightscout_mcp_runtime::{McpCommands, run};

#[derive(Parser)]
#[command(
    name = "nightscout-mcp",
    version,
    about = "Nightscout MCP server: read-only glucose analytics over stdio"
)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Emit logs as JSON lines on stderr
    #[arg(long, env = "NIGHTSCOUT_LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: McpCommands,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "nightscout_mcp_runtime=info,nightscout_mcp=info".into());
    // stdout carries protocol frames; logs must stay on stderr.
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            on_signal.cancel();
        }
    });

    let code = run(cli.connection, cli.command, shutdown).await;
    std::process::exit(code);
}
