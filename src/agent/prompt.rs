//! Planning prompt rendering with Handlebars.

use handlebars::Handlebars;
use serde::Serialize;

use crate::domain::{ExecutionLog, IterationRecord};
use crate::error::{PilotError, Result};
use crate::retrieval::KnowledgeMatch;

/// Default planning prompt.
pub const PLAN_TEMPLATE: &str = r#"You are an autonomous system administration agent. You reach a goal by proposing shell commands that are executed on a target system, reading their results, and iterating.

## Goal
{{goal}}

## Target environment
{{environment}}

## Progress
Iteration {{iteration}} of {{max_iterations}}.
{{#if install_attempted}}
An install command has already been run. Check whether it worked before running it again. Once the goal is met, reply with isFinalStep set to true.
{{else}}
No install command has been run yet. Do not declare the goal complete until the required software is actually present.
{{/if}}
{{#if history}}

## Previous iterations
{{#each history}}
### Iteration {{iteration}}: {{summary}}
Reasoning: {{reasoning}}
{{#each logs}}
$ {{command}}
exit code {{exit_code}}{{#if error}} ({{error}}){{/if}}
{{output}}
{{/each}}
{{/each}}
{{/if}}
{{#if knowledge}}

## Reference material
{{#each knowledge}}
### {{title}}
{{content}}
{{#if commands}}
Suggested commands:
{{#each commands}}
- {{this}}
{{/each}}
{{/if}}
{{/each}}
{{/if}}

## Instructions
- Commands run non-interactively, one after another, in the same order you list them. Use flags such as -y to avoid prompts.
- If a previous command failed, change the approach instead of repeating it unchanged.
- Set isFinalStep to true only when the goal should already be achieved; it will be verified independently.

## Response format
Reply with exactly one JSON object:
{"reasoning": "why these commands", "commands": ["command 1", "command 2"], "expectedOutcome": "what should be true afterwards", "isFinalStep": false}
"#;

/// Everything the planning prompt shows the reasoning service.
#[derive(Debug, Clone, Serialize)]
pub struct PromptContext {
    pub goal: String,
    pub environment: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub install_attempted: bool,
    pub history: Vec<IterationView>,
    pub knowledge: Vec<KnowledgeMatch>,
}

/// Condensed iteration record for the prompt.
#[derive(Debug, Clone, Serialize)]
pub struct IterationView {
    pub iteration: u32,
    pub summary: String,
    pub reasoning: String,
    pub logs: Vec<LogView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogView {
    pub command: String,
    pub exit_code: i32,
    pub error: Option<String>,
    pub output: String,
}

impl IterationView {
    pub fn from_record(record: &IterationRecord, max_output_chars: usize) -> Self {
        Self {
            iteration: record.iteration,
            summary: record.summary.clone(),
            reasoning: record.plan.reasoning.clone(),
            logs: record
                .logs
                .iter()
                .map(|l| LogView::from_log(l, max_output_chars))
                .collect(),
        }
    }
}

impl LogView {
    pub fn from_log(log: &ExecutionLog, max_output_chars: usize) -> Self {
        Self {
            command: log.command.clone(),
            exit_code: log.exit_code,
            error: log.error.clone(),
            output: truncate_tail(log.output.trim_end(), max_output_chars),
        }
    }
}

/// Keep the last `max_chars` characters; errors usually sit at the end.
pub fn truncate_tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - max_chars).collect();
    format!("[... {} characters truncated]\n{}", count - max_chars, tail)
}

/// Renders planning prompts
pub struct PromptRenderer {
    handlebars: Handlebars<'static>,
    template: String,
}

impl Default for PromptRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptRenderer {
    /// Renderer using `PLAN_TEMPLATE`
    pub fn new() -> Self {
        Self::with_template(PLAN_TEMPLATE)
    }

    /// Renderer using a custom template with the same variables
    pub fn with_template(template: impl Into<String>) -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        // prompts are plain text, not HTML
        handlebars.register_escape_fn(handlebars::no_escape);
        Self {
            handlebars,
            template: template.into(),
        }
    }

    pub fn render(&self, context: &PromptContext) -> Result<String> {
        self.handlebars
            .render_template(&self.template, context)
            .map_err(|e| PilotError::InvalidState(format!("Failed to render prompt: {}", e)))
    }
}
