//! Interactive chat loop with approve/deny prompts.

use std::io::Write;

use anyhow::Result;
use hitl_agent::{
    EngineError, ExecutionEngine, ExecutionResult, ExecutionStatus, PendingConfirmation,
    ThreadStatus,
};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::render::PrintSink;

type Input = Lines<BufReader<Stdin>>;

/// Decision typed at the confirmation prompt.
pub fn parse_decision(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn prompt(text: &str) -> Result<()> {
    print!("{text}");
    std::io::stdout().flush()?;
    Ok(())
}

pub async fn run(engine: &ExecutionEngine, thread_id: &str) -> Result<()> {
    let mut input: Input = BufReader::new(tokio::io::stdin()).lines();
    println!("Thread {thread_id}. Type /quit to leave.");

    if engine.thread_status(thread_id).await? == ThreadStatus::SuspendedAwaitingConfirmation {
        if let Some(pending) = engine.pending_confirmation(thread_id).await? {
            println!("This thread is waiting for a decision.");
            let Some(outcome) = confirm(engine, thread_id, &pending, &mut input).await? else {
                return Ok(());
            };
            if !settle(engine, thread_id, outcome, &mut input).await? {
                return Ok(());
            }
        }
    }

    loop {
        prompt("\n> ")?;
        let Some(line) = input.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "/quit" | "/exit") {
            break;
        }

        let outcome = engine.submit_with_sink(thread_id, line, &PrintSink).await;
        if !settle(engine, thread_id, outcome, &mut input).await? {
            break;
        }
    }

    println!("Bye. Resume later with: hitl chat --thread {thread_id}");
    Ok(())
}

/// Follow a result through any further confirmations.
/// Returns false when input ended while a decision was pending.
async fn settle(
    engine: &ExecutionEngine,
    thread_id: &str,
    mut outcome: Result<ExecutionResult, EngineError>,
    input: &mut Input,
) -> Result<bool> {
    loop {
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                // model and tool errors leave the thread usable
                eprintln!("error: {e}");
                tracing::error!(thread_id = %thread_id, error = %e, "Turn failed");
                return Ok(true);
            }
        };

        match result.status {
            ExecutionStatus::Completed => return Ok(true),
            ExecutionStatus::Stalled { round_trips } => {
                println!("(stopped after {round_trips} model calls without a final answer)");
                return Ok(true);
            }
            ExecutionStatus::Suspended { pending } => {
                outcome = match confirm(engine, thread_id, &pending, input).await? {
                    Some(next) => next,
                    None => return Ok(false),
                };
            }
        }
    }
}

/// Ask about one pending call and resume with the answer.
async fn confirm(
    engine: &ExecutionEngine,
    thread_id: &str,
    pending: &PendingConfirmation,
    input: &mut Input,
) -> Result<Option<Result<ExecutionResult, EngineError>>> {
    println!("  {} wants to run with {}", pending.tool_name, pending.arguments);
    prompt("  Allow? [y/N] ")?;

    let Some(answer) = input.next_line().await? else {
        return Ok(None);
    };
    let approved = parse_decision(&answer);
    Ok(Some(
        engine
            .resume_with_sink(thread_id, approved, &PrintSink)
            .await,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_explicit_yes_approves() {
        assert!(parse_decision("y"));
        assert!(parse_decision(" YES \n"));
        assert!(!parse_decision(""));
        assert!(!parse_decision("n"));
        assert!(!parse_decision("sure"));
    }
}
