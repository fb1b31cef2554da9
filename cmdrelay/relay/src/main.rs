use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use cmdrelay::{
    budget::MessageBudget,
    config::{is_stdio, RelayConfig},
    executor::ProcessExecutor,
    relay::{wait_for_shutdown, Relay},
    telemetry::RelayTelemetry,
};
use cmdrelay_dispatch::{DispatchError, Dispatcher};
use serde_json::json;
use shared_event_bus::{FileMessagePublisher, JsonLinesSubscription, MessageSubscription};
use shared_logging::LogLevel;

#[derive(Parser, Debug)]
#[command(name = "cmdrelay", version, about = "Runs commands triggered by bus messages")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Consumes inbound messages and publishes command output.
    Run(RunArgs),
    /// Shows which pattern and invocation a text would produce, without running it.
    Match {
        #[arg(long, default_value = "config/config.toml")]
        config: PathBuf,
        /// Message text; multiple words are joined with spaces.
        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        text: Vec<String>,
    },
    /// Lists configured patterns.
    Patterns {
        #[arg(long, default_value = "config/config.toml")]
        config: PathBuf,
    },
}

#[derive(Parser, Debug)]
struct RunArgs {
    #[arg(long, default_value = "config/config.toml")]
    config: PathBuf,
    /// Inbound JSON-lines file, `-` for stdin. Overrides the config.
    #[arg(long)]
    inbox: Option<PathBuf>,
    /// Outbound JSON-lines file. Overrides the config.
    #[arg(long)]
    outbox: Option<PathBuf>,
    /// Stop after this many messages; 0 runs until the inbox closes.
    #[arg(long)]
    max_messages: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => handle_run(args).await,
        Commands::Match { config, text } => {
            let config = RelayConfig::load(&config)?;
            let dispatcher = Dispatcher::new(Arc::clone(&config.patterns));
            let text = text.join(" ");
            match dispatcher.dispatch(&text) {
                Ok(dispatch) => {
                    println!("{}", serde_json::to_string_pretty(&dispatch)?);
                    Ok(())
                }
                Err(err @ DispatchError::NoMatch { .. }) => bail!("dispatch miss: {err}"),
                Err(err) => Err(err.into()),
            }
        }
        Commands::Patterns { config } => {
            let config = RelayConfig::load(&config)?;
            for (key, pattern) in config.patterns.iter() {
                let key = if key.is_empty() { "<empty>" } else { key };
                println!(
                    "{key} | {} | pass_args={} pass_stdin={} expand_env={}",
                    pattern.command, pattern.pass_args, pattern.pass_stdin, pattern.expand_env
                );
            }
            Ok(())
        }
    }
}

async fn handle_run(args: RunArgs) -> Result<()> {
    let config = RelayConfig::load(&args.config)?;

    let mut telemetry = RelayTelemetry::builder("cmdrelay").debug(config.debug);
    if let Some(path) = &config.runtime.log_path {
        telemetry = telemetry.log_path(path);
    }
    if let Some(path) = &config.runtime.event_log {
        telemetry = telemetry.event_log(path);
    }
    let telemetry = telemetry.build()?;

    for warning in config.warnings() {
        telemetry.log(LogLevel::Warn, "relay.config.warning", json!({ "detail": warning }));
    }

    let outbox = args.outbox.unwrap_or_else(|| config.outbox_path());
    let inbox = args.inbox.or_else(|| config.runtime.inbox.clone());
    let mut budget =
        MessageBudget::from_setting(args.max_messages.unwrap_or(config.runtime.max_messages));

    telemetry.log(
        LogLevel::Info,
        "relay.started",
        json!({
            "started_at": Utc::now().to_rfc3339(),
            "project_id": config.project_id,
            "subscription": config.subscription_name,
            "topic": config.topic_name,
            "credentials": config.credentials,
            "patterns": config.patterns.len(),
            "inbox": inbox,
            "outbox": outbox,
            "max_messages": budget.remaining(),
        }),
    );
    telemetry
        .event(
            "relay.started",
            json!({ "subscription": config.subscription_name, "topic": config.topic_name }),
        )
        .await;

    let subscription: Box<dyn MessageSubscription> = match inbox {
        Some(path) if !is_stdio(&path) => Box::new(JsonLinesSubscription::open(&path).await?),
        _ => Box::new(JsonLinesSubscription::stdin()),
    };

    let shutdown = wait_for_shutdown(tokio::signal::ctrl_c(), telemetry.clone());
    let relay = Relay::new(
        Dispatcher::new(Arc::clone(&config.patterns)),
        Arc::new(ProcessExecutor::new(config.runtime.timeout())),
        Arc::new(FileMessagePublisher::new(&outbox)?),
        config.topic_name.clone(),
        telemetry,
    );

    let summary = relay
        .run(subscription.as_ref(), &mut budget, shutdown)
        .await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
