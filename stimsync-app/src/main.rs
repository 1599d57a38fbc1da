mod app;
mod cli;
mod logging;

use clap::Parser;

fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    logging::init(cli.log_level.as_deref())?;
    app::run(cli.command)?;

    Ok(())
}
