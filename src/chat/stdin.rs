// ABOUTME: Chat source reading `name: text` lines, used for local runs and piping transcripts
// ABOUTME: End of input is a clean finish; read errors are reported for the supervisor to retry

use anyhow::{Context, Result};
use async_trait::async_trait;
use streamtalk_core::traits::ChatSource;
use streamtalk_core::{InboundMessage, IntakeSender};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

/// Sender used for lines without a `name:` prefix
pub const CONSOLE_SENDER: &str = "console";

/// Parse one input line. Blank lines yield None.
pub fn parse_line(line: &str) -> Option<InboundMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match line.split_once(':') {
        Some((name, text)) if is_sender_name(name.trim()) && !text.trim().is_empty() => {
            let name = name.trim();
            Some(InboundMessage::new(name, name, text.trim()))
        }
        _ => Some(InboundMessage::new(CONSOLE_SENDER, CONSOLE_SENDER, line)),
    }
}

fn is_sender_name(name: &str) -> bool {
    !name.is_empty() && name.chars().count() <= 32 && !name.contains(char::is_whitespace)
}

/// Feed lines from a reader into the intake queue until EOF or cancellation.
/// Returns the number of messages enqueued.
pub async fn pump_lines<R>(reader: R, intake: &IntakeSender, cancel: &CancellationToken) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut sent = 0;
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line.context("Failed to read chat line")?,
        };
        let Some(line) = line else {
            break;
        };
        if let Some(message) = parse_line(&line) {
            if !intake.enqueue(message) {
                tracing::info!("Intake closed, stopping line reader");
                break;
            }
            sent += 1;
        }
    }
    Ok(sent)
}

pub struct StdinSource;

#[async_trait]
impl ChatSource for StdinSource {
    fn name(&self) -> &str {
        "stdin"
    }

    async fn run(&self, intake: IntakeSender, cancel: CancellationToken) -> Result<()> {
        let sent = pump_lines(BufReader::new(tokio::io::stdin()), &intake, &cancel).await?;
        tracing::info!(messages = sent, "Standard input closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_named_line() {
        let message = parse_line("alice: 7번이요").unwrap();
        assert_eq!(message.sender_id, "alice");
        assert_eq!(message.sender_name, "alice");
        assert_eq!(message.text, "7번이요");
    }

    #[test]
    fn test_parse_line_without_name() {
        let message = parse_line("just talking").unwrap();
        assert_eq!(message.sender_name, CONSOLE_SENDER);
        assert_eq!(message.text, "just talking");

        // A colon inside a sentence is not a sender prefix
        let message = parse_line("note to self: buy milk").unwrap();
        assert_eq!(message.sender_name, CONSOLE_SENDER);
        assert_eq!(message.text, "note to self: buy milk");
    }

    #[test]
    fn test_parse_blank_line() {
        assert!(parse_line("   ").is_none());
    }
}
