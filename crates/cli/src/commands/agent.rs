//! `stepwise agent`: Run the tool-using agent on a single message.

use stepwise_agent::AgentStreamEvent;
use stepwise_core::message::ConversationId;

/// Longest tool result echoed to the terminal.
const MAX_RESULT_CHARS: usize = 200;

pub async fn run(
    message: String,
    conversation: Option<String>,
    stream: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (config, state) = super::load_state()?;
    let conversation_id = conversation.unwrap_or_else(|| ConversationId::new().to_string());

    eprintln!(
        "  Provider: {}  Model: {}  Max steps: {}",
        config.default_provider, config.default_model, config.agent.max_steps
    );

    if !stream {
        eprint!("  Thinking...");
        let result = state.agent.run_agent(&message, &conversation_id).await;
        eprint!("\r              \r");
        println!("{}", result?);
        return Ok(());
    }

    let mut events = state.agent.run_agent_stream(&message, &conversation_id);
    let mut failure = None;
    while let Some(event) = events.recv().await {
        println!("{}", render(&event));
        if let AgentStreamEvent::Error { content } = event {
            failure = Some(content);
        }
    }

    match failure {
        Some(reason) => Err(format!("Agent run failed: {reason}").into()),
        None => Ok(()),
    }
}

/// One terminal line per event.
fn render(event: &AgentStreamEvent) -> String {
    match event {
        AgentStreamEvent::StepStart { step, max_steps } => format!("── step {step}/{max_steps} ──"),
        AgentStreamEvent::Thinking { content } => format!("  {content}"),
        AgentStreamEvent::ToolCall { tool, args } => format!("  → {tool} {args}"),
        AgentStreamEvent::ToolResult { tool, result } => {
            format!("  ← {tool}: {}", truncate(result, MAX_RESULT_CHARS))
        }
        AgentStreamEvent::StepResult { step, content } => {
            format!("  [{step}] {}", truncate(content, MAX_RESULT_CHARS))
        }
        AgentStreamEvent::Finished { content } => format!("✓ {content}"),
        AgentStreamEvent::Error { content } => format!("✗ {content}"),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let head: String = flat.chars().take(max_chars).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_each_event_on_one_line() {
        let lines = [
            render(&AgentStreamEvent::StepStart { step: 1, max_steps: 20 }),
            render(&AgentStreamEvent::ToolCall {
                tool: "shell".into(),
                args: r#"{"command":"ls"}"#.into(),
            }),
            render(&AgentStreamEvent::ToolResult {
                tool: "shell".into(),
                result: "a\nb".into(),
            }),
            render(&AgentStreamEvent::Error { content: "boom".into() }),
        ];
        assert_eq!(lines[0], "── step 1/20 ──");
        assert_eq!(lines[1], r#"  → shell {"command":"ls"}"#);
        assert_eq!(lines[2], "  ← shell: a b");
        assert_eq!(lines[3], "✗ boom");
    }

    #[test]
    fn long_results_are_truncated() {
        let out = truncate(&"é".repeat(300), 10);
        assert_eq!(out, format!("{}...", "é".repeat(10)));
        assert_eq!(truncate("short", 10), "short");
    }
}
