use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "stimsync", version, about = "Synchronized visual stimuli across screens")]
pub struct Cli {
    /// Log filter used when RUST_LOG is unset (e.g. `debug`).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the controller that fans batches out to every screen.
    Server {
        #[arg(short, long)]
        config: PathBuf,
        /// Override `control_addr`.
        #[arg(long)]
        control_addr: Option<String>,
    },
    /// Run one screen's render loop.
    Screen {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        name: Option<String>,
        /// Override `command_addr`.
        #[arg(long)]
        command_addr: Option<String>,
        /// Override `sync_trace_path`.
        #[arg(long)]
        sync_trace: Option<PathBuf>,
    },
    /// Send one batch to a running controller and print its report.
    Send {
        #[arg(long, default_value = "127.0.0.1:60629")]
        addr: String,
        /// Batch as JSON: an array of commands or a single command.
        batch: String,
        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,
    },
    /// Compare display and tracker sync traces.
    Latency {
        #[arg(long)]
        display: PathBuf,
        #[arg(long)]
        tracker: PathBuf,
        #[arg(long, default_value_t = 10.0)]
        window_size: f64,
        #[arg(long, default_value_t = 32)]
        windows: usize,
        /// Print the report as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn latency_defaults() {
        let cli = Cli::parse_from([
            "stimsync",
            "latency",
            "--display",
            "d.json",
            "--tracker",
            "t.json",
        ]);
        let Command::Latency {
            window_size,
            windows,
            json,
            ..
        } = cli.command
        else {
            panic!("expected latency");
        };
        assert_eq!(window_size, 10.0);
        assert_eq!(windows, 32);
        assert!(!json);
    }
}
