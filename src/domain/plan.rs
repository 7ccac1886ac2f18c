//! Execution plan - one reasoning-service proposal for the next commands.
//!
//! The reasoning service may wrap its JSON in prose or code fences, so parsing
//! locates the first well-formed JSON object in the text and then validates it
//! against the plan shape. A partially-shaped object is rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PilotError, Result};

/// The reasoning service's proposal for one iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub reasoning: String,
    pub commands: Vec<String>,
    pub expected_outcome: String,
    pub is_final_step: bool,
}

const REQUIRED_FIELDS: [&str; 4] = ["reasoning", "commands", "expectedOutcome", "isFinalStep"];

impl ExecutionPlan {
    /// Parse a reasoning-service response into a plan.
    pub fn parse(response: &str) -> Result<Self> {
        let object = first_json_object(response)
            .ok_or_else(|| PilotError::PlanParse("no JSON object found in response".to_string()))?;

        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| object.get(*field).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(PilotError::PlanParse(format!(
                "plan is missing required fields: {}",
                missing.join(", ")
            )));
        }

        let mut plan: ExecutionPlan =
            serde_json::from_value(object).map_err(|e| PilotError::PlanParse(format!("invalid plan shape: {}", e)))?;
        plan.commands = plan
            .commands
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        Ok(plan)
    }

    pub fn has_commands(&self) -> bool {
        !self.commands.is_empty()
    }
}

/// Find the first balanced `{...}` region that parses as a JSON object.
pub fn first_json_object(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut start = 0;
    while let Some(offset) = text[start..].find('{') {
        let open = start + offset;
        if let Some(close) = matching_brace(bytes, open) {
            if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&text[open..=close]) {
                return Some(value);
            }
        }
        start = open + 1;
    }
    None
}

/// Index of the brace closing the one at `open`, skipping string literals.
fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
