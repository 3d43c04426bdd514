use std::cell::RefCell;
use std::io::{self, Write};
use std::path::Path;

use log::debug;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

use super::args::{Args, Command};
use super::render::{write_json, write_transcript, Presenter};
use crate::{
    client::{AgentClient, FileHistory, HistorySource, ThreadHistory},
    core::{
        ChatError, Config, ConversationEngine, LogErrorSink, Operation, OutputFormat,
        StreamOutcome,
    },
    processing::convert_server_history_to_messages,
};

pub async fn run(args: Args) -> Result<StreamOutcome, ChatError> {
    let mut config = Config::load()?;
    if let Some(format) = args.format {
        config.update_format(format);
    }

    debug!(
        "[SETTINGS] server: {}, format: {:?}",
        config.server.base_url, config.output.format
    );

    match args.command {
        Command::Send {
            agent,
            thread,
            query,
        } => send(&config, &agent, &thread, &query.join(" ")).await,
        Command::Replay {
            input,
            prompt,
            history,
        } => {
            let reader: Box<dyn AsyncRead + Send + Unpin> = if input == "-" {
                Box::new(tokio::io::stdin())
            } else {
                Box::new(tokio::fs::File::open(&input).await?)
            };
            let (outcome, _) = replay(
                &config,
                reader,
                prompt.as_deref(),
                history.as_deref(),
                io::stdout(),
            )
            .await?;
            Ok(outcome)
        }
        Command::History { agent, thread } => {
            let client = AgentClient::new(&config)?;
            let history = client.get_agent_history(&agent, &thread).await?;
            let units = convert_server_history_to_messages(&history);
            let mut stdout = io::stdout();
            match config.output.format {
                OutputFormat::Json => write_json(&mut stdout, &units)?,
                OutputFormat::Text => write_transcript(&mut stdout, &units)?,
            }
            stdout.flush()?;
            Ok(StreamOutcome::Completed)
        }
    }
}

/// Posts `query` and streams the reply live. Ctrl-C cancels the stream.
async fn send(
    config: &Config,
    agent: &str,
    thread: &str,
    query: &str,
) -> Result<StreamOutcome, ChatError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(ChatError::ApiError("Query must not be empty".to_string()));
    }

    let client = AgentClient::new(config)?;
    let source = ThreadHistory::new(client.clone(), agent, thread);
    let mut engine = ConversationEngine::new(Some(Box::new(source)), Box::new(LogErrorSink));
    engine.load_history().await;
    engine.push_prompt(query);

    let presenter = RefCell::new(Presenter::new(
        io::stdout(),
        config.output.format,
        true,
        config.scroll_options(),
    ));

    let response = match client.send_agent_message(agent, query, thread).await {
        Ok(response) => response,
        Err(e) => {
            let units = engine.fail(&e, Operation::Send);
            presenter.into_inner().finish(units)?;
            return Ok(StreamOutcome::Failed);
        }
    };

    let token = engine.cancellation_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let outcome = engine
        .process_response(
            response,
            |units| presenter.borrow_mut().update(units),
            || presenter.borrow_mut().scroll(),
        )
        .await;
    ctrl_c.abort();

    presenter.into_inner().finish(engine.units())?;
    Ok(outcome)
}

/// Runs a recorded response body through the engine and writes the final
/// transcript to `out`. `prompt` opens the unit the recording answers.
pub async fn replay<R, W>(
    config: &Config,
    reader: R,
    prompt: Option<&str>,
    history: Option<&Path>,
    out: W,
) -> Result<(StreamOutcome, W), ChatError>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: Write,
{
    let source = history.map(|path| Box::new(FileHistory::new(path)) as Box<dyn HistorySource>);
    let mut engine = ConversationEngine::new(source, Box::new(LogErrorSink));
    if let Some(prompt) = prompt {
        engine.push_prompt(prompt);
    }

    let presenter = RefCell::new(Presenter::new(
        out,
        config.output.format,
        false,
        config.scroll_options(),
    ));
    let outcome = engine
        .process_stream(
            ReaderStream::new(reader),
            |units| presenter.borrow_mut().update(units),
            || presenter.borrow_mut().scroll(),
        )
        .await;

    let out = presenter.into_inner().finish(engine.units())?;
    Ok((outcome, out))
}
