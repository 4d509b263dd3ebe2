// Entrypoint for the CLI application.
// - Loads `.env` files before reading settings so keys never live in code.
// - Returns `anyhow::Result`; a run where any platform failed exits with 1.

use anyhow::Context;
use clap::Parser;
use socialpost_cli::config::{self, Settings};
use socialpost_cli::pipeline::Pipeline;
use socialpost_cli::ui::{self, Cli, Command};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Env files first so RUST_LOG from them is honoured.
    let env_loaded = config::load_env_files(cli.env_file.as_deref());
    let default_level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
    match env_loaded.context("Failed to load environment file")? {
        Some(path) => log::info!("Loaded environment from {}", path.display()),
        None => log::debug!("No env file found, using the process environment"),
    }

    let settings = Settings::from_env().context(
        "Set GEMINI_API_KEY, TYPEFULLY_API_KEY and TYPEFULLY_SOCIAL_SET_ID (or put them in .env)",
    )?;
    let pipeline = Pipeline::new(&settings).context("Failed to build HTTP clients")?;

    let ok = ui::dispatch(&pipeline, cli.command.unwrap_or(Command::Menu))?;
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
