use std::io::{self, BufRead, Write};

use tabletalk_agent::Conversation;
use tabletalk_core::config::LoadOptions;

use crate::commands::query::{execute, parse_payload};
use crate::commands::{
    async_runtime, build_agent, load_config, open_translator, CommandFailure, CommandResult,
};

const PROMPT: &str = "you> ";

pub fn run(options: &LoadOptions, read_only: Option<bool>) -> CommandResult {
    let stdin = io::stdin();
    let stdout = io::stdout();
    run_with(options, read_only, stdin.lock(), stdout.lock())
}

/// Reads prompts line by line until `/quit` or end of input. Lines starting
/// with `/db ` are structured payloads for the translator.
pub fn run_with<R, W>(
    options: &LoadOptions,
    read_only: Option<bool>,
    input: R,
    mut output: W,
) -> CommandResult
where
    R: BufRead,
    W: Write,
{
    let config = match load_config(options) {
        Ok(config) => config,
        Err(failure) => return failure.into_result("chat"),
    };
    let runtime = match async_runtime() {
        Ok(runtime) => runtime,
        Err(failure) => return failure.into_result("chat"),
    };

    let read_only = read_only.or(config.agent.read_only);
    let result = runtime.block_on(async {
        let translator = open_translator(&config.database).await?;
        let agent = build_agent(&config, &translator)?;
        let mut conversation = Conversation::with_system_prompt(&config.agent.system_prompt);
        let mut turns = 0_usize;

        write_prompt(&mut output)?;
        for line in input.lines() {
            let line = line.map_err(io_failure)?;
            let line = line.trim();

            if line == "/quit" || line == "/exit" {
                break;
            }
            if let Some(payload) = line.strip_prefix("/db ") {
                let reply = match parse_payload(payload) {
                    Ok(payload) => execute(&translator, payload).await,
                    Err(failure) => Err(failure),
                };
                let rendered = match reply {
                    Ok(value) => serde_json::to_string_pretty(&value)
                        .unwrap_or_else(|_| value.to_string()),
                    Err(failure) => format!("error ({}): {}", failure.error_class, failure.message),
                };
                writeln!(output, "{rendered}").map_err(io_failure)?;
            } else if !line.is_empty() {
                let answer = agent.chat(&mut conversation, line, read_only).await;
                writeln!(output, "assistant> {answer}").map_err(io_failure)?;
                turns += 1;
            }
            write_prompt(&mut output)?;
        }

        translator.pool().close().await;
        Ok::<_, CommandFailure>(turns)
    });

    match result {
        Ok(turns) => CommandResult::success("chat", format!("chat ended after {turns} turns")),
        Err(failure) => failure.into_result("chat"),
    }
}

fn write_prompt<W: Write>(output: &mut W) -> Result<(), CommandFailure> {
    write!(output, "{PROMPT}").and_then(|()| output.flush()).map_err(io_failure)
}

fn io_failure(error: io::Error) -> CommandFailure {
    CommandFailure::new("io", format!("terminal i/o failed: {error}"), 8)
}
