use std::process::ExitCode;

use agent_chat::cli::{run, Args};
use agent_chat::StreamOutcome;
use anyhow::Context;
use clap::Parser;
use log::{debug, LevelFilter};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let _ = dotenv::dotenv();
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(if args.debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        })
        .parse_default_env()
        .init();

    let outcome = run(args).await.context("agent-chat failed")?;
    debug!("[Stream] outcome: {outcome:?}");

    Ok(match outcome {
        StreamOutcome::Completed => ExitCode::SUCCESS,
        StreamOutcome::Cancelled | StreamOutcome::Failed => ExitCode::FAILURE,
    })
}
