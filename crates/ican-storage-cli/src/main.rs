use std::path::PathBuf;

use clap::Parser;
use ican_storage::StorageType;
use tracing::{info, Level};

use crate::command::{Command, RunCommand};
use crate::logger::{LoggerConfig, LoggerFormat};

mod command;
mod config;
mod logger;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Overrides the key prefix
    #[arg(short, long)]
    pub prefix: Option<String>,
    /// Overrides the backend (localStorage, sessionStorage or cookie)
    #[arg(short = 't', long)]
    pub storage_type: Option<StorageType>,
    /// Sets the log output format
    #[arg(long, value_enum, default_value_t = LoggerFormat::Text)]
    pub log_format: LoggerFormat,
    /// Logs every storage event
    #[arg(short, long)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let app_config = config::load_config(args.config, args.prefix, args.storage_type)?;

    let level = if args.verbose { Level::DEBUG } else { LoggerConfig::default().level };
    logger::init_logger(LoggerConfig { format: args.log_format, level });

    let data_dir = app_config.data_dir()?;
    let storage = command::open_storage(app_config.storage, data_dir);
    let mut events = storage.subscribe();

    let result = args.command.run(&storage);

    while let Ok(event) = events.try_recv() {
        info!(?event, "storage event");
    }

    result
}
