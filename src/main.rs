use clap::Parser;
use poly_snipe::cli::{reset_pnl, Cli, Commands};
use poly_snipe::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
            eprintln!("Using default configuration");
            toml::from_str(include_str!("../config.toml.example"))?
        }
    };

    poly_snipe::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Run(args) => args.execute(config).await?,
        Commands::Status(args) => args.execute(&config).await?,
        Commands::Trades(args) => args.execute(&config).await?,
        Commands::Claim(args) => args.execute(&config).await?,
        Commands::ResetPnl => reset_pnl(&config).await?,
        Commands::Config => print!("{}", toml::to_string_pretty(&config)?),
    }

    Ok(())
}
