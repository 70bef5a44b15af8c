// ABOUTME: Closed tagged-union model of the agent CLI's stream-json stdout lines

use serde::Deserialize;
use serde_json::Value;

/// One decoded stdout line from the agent's `--output-format stream-json`
/// mode, keyed on the `type` discriminator. Adding a kind here is a
/// compile-time-checked change for every consumer.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentOutput {
    /// Assistant turn carrying content blocks (text and/or tool invocations).
    Assistant {
        #[serde(default)]
        message: AssistantMessage,
    },
    /// Top-level tool invocation.
    ToolUse {
        name: Option<String>,
        #[serde(default)]
        input: Value,
    },
    /// Result of a prior tool invocation, with an optional error string.
    ToolResult {
        name: Option<String>,
        output: Option<Value>,
        error: Option<String>,
    },
    /// Explicit error object from the agent.
    Error { error: Option<String> },
    /// Recognized JSON with a discriminator we do not classify (system
    /// chatter, result summaries). Logged, never turned into an event.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_text_block_decodes() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"done"}]}}"#;
        let output: AgentOutput = serde_json::from_str(line).unwrap();
        match output {
            AgentOutput::Assistant { message } => {
                assert_eq!(message.content.len(), 1);
                assert!(matches!(
                    &message.content[0],
                    ContentBlock::Text { text } if text == "done"
                ));
            }
            other => panic!("expected assistant, got {other:?}"),
        }
    }

    #[test]
    fn tool_use_decodes_name_and_input() {
        let line = r#"{"type":"tool_use","name":"Bash","input":{"command":"ls"}}"#;
        let output: AgentOutput = serde_json::from_str(line).unwrap();
        match output {
            AgentOutput::ToolUse { name, input } => {
                assert_eq!(name.as_deref(), Some("Bash"));
                assert_eq!(input["command"], "ls");
            }
            other => panic!("expected tool_use, got {other:?}"),
        }
    }

    #[test]
    fn tool_result_carries_optional_error() {
        let line = r#"{"type":"tool_result","name":"Bash","output":"ok","error":null}"#;
        let output: AgentOutput = serde_json::from_str(line).unwrap();
        match output {
            AgentOutput::ToolResult { name, error, .. } => {
                assert_eq!(name.as_deref(), Some("Bash"));
                assert!(error.is_none());
            }
            other => panic!("expected tool_result, got {other:?}"),
        }
    }

    #[test]
    fn unclassified_type_falls_into_other() {
        let line = r#"{"type":"system","subtype":"init","model":"x"}"#;
        let output: AgentOutput = serde_json::from_str(line).unwrap();
        assert!(matches!(output, AgentOutput::Other));
    }
}
