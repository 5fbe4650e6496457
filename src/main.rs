use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use vcamd::paths::DaemonPaths;
use vcamd::user_config::UserConfig;
use vcamd::VcamDaemon;

#[derive(Parser)]
#[command(name = "vcamd", version, about = "Android camera/microphone bridge daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    Run {
        /// Path to config.toml (defaults to the XDG config dir)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the resolved daemon directories
    Paths,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let paths = DaemonPaths::resolve();

    match cli.command {
        Commands::Run { config } => {
            let config_path = config.unwrap_or_else(|| paths.config_file());
            let config = UserConfig::load(&config_path)?;
            let daemon = VcamDaemon::new(paths, &config);
            daemon.run().await?;
        }
        Commands::Paths => {
            println!("runtime: {}", paths.runtime_dir.display());
            println!("config:  {}", paths.config_dir.display());
            println!("state:   {}", paths.state_dir.display());
            println!("logs:    {}", paths.log_dir.display());
        }
    }

    Ok(())
}
