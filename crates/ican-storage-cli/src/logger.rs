use clap::ValueEnum;
use tracing::Level;
use tracing_subscriber::fmt::SubscriberBuilder;

pub(super) struct LoggerConfig {
    pub format: LoggerFormat,
    pub level: Level,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self { format: LoggerFormat::default(), level: Level::WARN }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub(super) enum LoggerFormat {
    #[default]
    Text,
    Json,
}

pub(super) fn init_logger(config: LoggerConfig) {
    // stdout carries command output
    let builder = SubscriberBuilder::default().with_max_level(config.level).with_writer(std::io::stderr);

    match config.format {
        LoggerFormat::Text => builder.init(),
        LoggerFormat::Json => builder.json().init(),
    }
}
