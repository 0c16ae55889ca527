use anyhow::Result;
use salas::{
    cli::{Cli, Commands},
    pipeline,
};
use std::time::Instant;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // a missing .env is fine, everything can come from the environment or flags
    dotenvy::dotenv().ok();
    let cli = Cli::parse_args();
    cli.init_logger()?;

    let name = match &cli.command {
        Commands::Registry(_) => "registry",
        Commands::Resolutions(_) => "resolutions",
        Commands::All { .. } => "all",
    };
    info!(pipeline = name, "=== Starting pipeline ===");
    let start = Instant::now();

    let res = match &cli.command {
        Commands::Registry(args) => pipeline::run_registry(&cli, args).await.map(|_| ()),
        Commands::Resolutions(args) => {
            pipeline::run_resolutions(&cli, args, None).await.map(|_| ())
        }
        Commands::All { registry, resume } => {
            pipeline::run_all(&cli, registry, *resume).await.map(|_| ())
        }
    };

    match &res {
        Ok(()) => info!(pipeline = name, elapsed = ?start.elapsed(), "=== Pipeline finished ==="),
        Err(err) => error!(pipeline = name, err = ?err, "=== Pipeline failed ==="),
    }
    res
}
