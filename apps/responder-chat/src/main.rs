mod cli;
mod config;
mod console;
mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chat_sync::{ChatSyncEngine, ManualActivity, StaticUserProvider, User};
use clap::Parser;
use cli::Cli;
use console::Console;
use responder_api::ResponderApiClient;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const PRINTER_DRAIN: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // --help and --version land here too.
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    if let Err(err) = telemetry::init(&cli.logging.to_config()) {
        eprintln!("responder-chat: {err}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "responder-chat failed");
            eprintln!("responder-chat: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let sync = config::sync_config_from_env().context("invalid RESPONDER_SYNC__* settings")?;
    let client = ResponderApiClient::with_timeout(
        &cli.api_url,
        cli.token,
        Duration::from_secs(cli.timeout_secs.max(1)),
    )
    .context("failed to create API client")?;
    info!(api = %client.base_url(), poll_interval_ms = sync.poll_interval_ms, "starting");

    let user = match cli.user_id {
        Some(id) if !id.trim().is_empty() => Some(User {
            id: id.trim().to_string(),
            display_name: cli.user_name,
            avatar_url: None,
        }),
        _ => {
            warn!("RESPONDER_USER_ID not set; sending is disabled");
            None
        }
    };

    let activity = Arc::new(ManualActivity::new(true));
    let engine = Arc::new(ChatSyncEngine::new(
        Arc::new(client),
        activity.clone(),
        Arc::new(StaticUserProvider::new(user)),
        sync,
    ));

    let (lines_tx, lines_rx) = mpsc::unbounded_channel();
    let printer = console::spawn_printer(lines_rx, tokio::io::stdout());
    let renderer = console::spawn_renderer(engine.subscribe(), lines_tx.clone());
    let console = Console::new(engine.clone(), activity, lines_tx);

    match cli.task.as_deref() {
        // A failed first load is shown like any other error; polling retries.
        Some(task) => {
            let _ = engine.bind(Some(task)).await;
        }
        None => console.print("! no task given; use /bind <task-id>"),
    }

    let outcome = console
        .run(BufReader::new(tokio::io::stdin()))
        .await
        .context("failed to read commands");

    engine.unbind();
    renderer.abort();
    drop(console);
    let _ = renderer.await;
    // A send still in flight holds a line sender; don't wait on it forever.
    if tokio::time::timeout(PRINTER_DRAIN, printer).await.is_err() {
        warn!("console output still pending at shutdown");
    }
    info!("stopped");
    outcome
}
