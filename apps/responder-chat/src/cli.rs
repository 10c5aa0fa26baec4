use std::path::PathBuf;

use clap::{Args, Parser};

use crate::telemetry::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "responder-chat",
    about = "Follow and answer a task conversation from the terminal",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "RESPONDER_API_URL",
        value_name = "URL",
        help = "Base URL of the responder API"
    )]
    pub api_url: String,

    #[arg(
        long,
        env = "RESPONDER_API_TOKEN",
        hide_env_values = true,
        help = "Bearer token for the responder API"
    )]
    pub token: String,

    #[arg(
        long,
        env = "RESPONDER_TASK_ID",
        value_name = "ID",
        help = "Task conversation to open on start"
    )]
    pub task: Option<String>,

    #[arg(long, env = "RESPONDER_USER_ID", help = "Id of the logged-in responder")]
    pub user_id: Option<String>,

    #[arg(
        long,
        env = "RESPONDER_USER_NAME",
        default_value = "Responder",
        help = "Display name of the logged-in responder"
    )]
    pub user_name: String,

    #[arg(
        long,
        env = "RESPONDER_API_TIMEOUT_SECS",
        default_value_t = 8,
        help = "Per-request timeout in seconds"
    )]
    pub timeout_secs: u64,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "RESPONDER_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "RESPONDER_LOG_FILE",
        help = "Write logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}
