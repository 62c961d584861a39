/// Wall-Bounce CLI - multi-provider LLM consensus analyzer.
///
/// Entry point for the wallbounce binary. Parses CLI arguments,
/// initializes logging, and dispatches to subcommand handlers.
mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Multi-provider LLM consensus analyzer
#[derive(Parser)]
#[command(name = "wallbounce")]
#[command(version)]
#[command(about = "Bounce a query across heterogeneous LLM providers and reconcile their answers")]
#[command(after_help = "\
Exit codes:
  0  consensus at or above the configured floors
  1  insufficient providers
  2  all providers timed out
  3  approval denied
  4  canceled
  5  configuration or usage error")]
struct Cli {
    /// Path to config.toml
    #[arg(
        short = 'c',
        long,
        global = true,
        default_value = "~/.wallbounce/config.toml"
    )]
    config: String,

    /// Path to secrets.toml (flat `name = "value"` pairs)
    #[arg(long, global = true, default_value = "~/.wallbounce/secrets.toml")]
    secrets: String,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Analyze a query across the configured providers
    Analyze(commands::AnalyzeArgs),
    /// List registered providers
    Providers(commands::ProvidersArgs),
    /// Probe provider health
    Health(commands::HealthArgs),
    /// Inspect or delete sessions
    Sessions(commands::SessionsArgs),
    /// Validate configuration and connectivity
    Check(commands::CheckArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing-subscriber.
    //
    // Priority: RUST_LOG env var > --verbose/--quiet flags > default (warn).
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("wallbounce=debug,wallbounce_core=debug,info")
    } else if cli.quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::new("wallbounce=info,wallbounce_core=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(cli.verbose)
        .compact()
        .init();

    let paths = commands::Paths {
        config: commands::expand_tilde(&cli.config),
        secrets: commands::expand_tilde(&cli.secrets),
    };

    let code = match cli.command {
        Commands::Analyze(args) => commands::analyze::execute(&paths, args).await,
        Commands::Providers(args) => commands::providers::execute(&paths, args).await,
        Commands::Health(args) => commands::health::execute(&paths, args).await,
        Commands::Sessions(args) => commands::sessions::execute(&paths, args).await,
        Commands::Check(args) => commands::check::execute(&paths, args).await,
    };

    std::process::exit(code);
}
