//! Context builder — assembles the single prompt sent to the model each iteration.
//!
//! Section order is fixed: decision instructions, common sense, static memory,
//! static task, dynamic memory, dynamic task, available tools, conversation
//! history, then the current query. Empty sections are omitted.

use pulsar_core::types::{Message, ToolSpec};
use pulsar_core::utils::human_now;
use tracing::debug;

// ─────────────────────────────────────────────
// Decision instructions
// ─────────────────────────────────────────────

/// Tells the model how to shape a decision.
pub const DECISION_INSTRUCTIONS: &str = r#"
I am an AI assistant, which is good at answering the user's query from the conversation, based on the memory status and task status. In generating the response, I will consider answering with four parts:
1. Think: analyze the context and think about what to do next.
2. Text: the text response to the user's query.
3. Memory Operation: if I need to perform a memory operation, I will return the operation name and parameters. Make sure a memory operation is really necessary, not redundant and not repetitive.
4. Tool: if I need to use a tool, I will return the tool name and parameters. Make sure a tool call is really necessary, not redundant and not repetitive.

Furthermore, you have to explicitly indicate if you have finished the generation of response, or need to perform more steps or stop and wait for user's next query. This is important if you need multiple steps to answer current query well. But be careful, if you are not sure what to do next, you should leave the decision to the user. MAKE SURE you don't set 'finished' to true if you are still working on preparing the final response.

The result should be formatted in **JSON** dictionary and enclosed in **triple backticks (` ``` ` )** without labels like 'json', 'css', or 'data'.
- **Do not** generate redundant content other than the result in JSON format.
- **Do not** use triple backticks anywhere else in your answer.
- The JSON must include the following keys and values accordingly :
    - 'text': A JSON String for the text response to the user's query.
    - 'think': A JSON String for the description of the thinking process to respond to the user's query.
    - 'mem_op': ONLY USED when you need to perform a memory operation (from the available memory operations), the value is a dictionary with the operation name and parameters:
        - 'name': The name of the memory operation.
        - 'args': A dictionary of arguments for the operation.
    - 'tool': ONLY USED when you need to use a tool (from the available tools), the value is a dictionary with the tool name and parameters:
        - 'name': The name of the tool to use.
        - 'args': A dictionary of arguments for the tool.
    - 'finished': A JSON bool value indicating if your actions are finished, set 'true' to stop processing and send response to the user; set 'false' to continue the actions. When you used a tool or you need more steps to collect information to complete the response, you should set 'finished' to 'false'.
"#;

// ─────────────────────────────────────────────
// Context builder
// ─────────────────────────────────────────────

/// Everything one prompt is built from.
#[derive(Debug, Default)]
pub struct PromptInputs<'a> {
    pub static_memory: String,
    pub static_task: String,
    pub dynamic_memory: String,
    pub dynamic_task: String,
    /// Tool catalogue after filtering.
    pub tools: Vec<&'a ToolSpec>,
    /// History before the current query.
    pub history: &'a [Message],
    pub query: &'a str,
}

/// Builds decision prompts for the agent loop.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    instructions: String,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(DECISION_INSTRUCTIONS)
    }
}

impl ContextBuilder {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
        }
    }

    /// Facts the model cannot know on its own.
    pub fn common_sense(&self) -> String {
        format!("Current date and time: {}", human_now())
    }

    /// Assemble the full prompt.
    pub fn build_prompt(&self, inputs: &PromptInputs<'_>) -> String {
        let mut parts = vec![self.instructions.clone()];

        let sections = [
            ("Common Sense Information", self.common_sense()),
            ("Static Memory", inputs.static_memory.clone()),
            ("Static Task", inputs.static_task.clone()),
            ("Dynamic Memory", inputs.dynamic_memory.clone()),
            ("Dynamic Task", inputs.dynamic_task.clone()),
        ];
        for (heading, body) in sections {
            if !body.is_empty() {
                parts.push(format!("\n## {}:\n{}", heading, body));
            }
        }

        if !inputs.tools.is_empty() {
            parts.push("\n## Available Tools:".to_string());
            for tool in &inputs.tools {
                parts.push(format!("- {}: {}", tool.name, tool.description));
                parts.push(format!("  Input schema: {}", tool.input_schema));
            }
        }

        parts.push("## Conversation History:".to_string());
        for msg in inputs.history {
            parts.push(format!("{}: {}", msg.role.label(), msg.content));
        }

        parts.push(format!("\nUser Query: {}", inputs.query));
        parts.push("\nYour Answer:\n".to_string());

        let prompt = parts.join("\n");
        debug!(chars = prompt.len(), tools = inputs.tools.len(), "Built prompt");
        prompt
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
