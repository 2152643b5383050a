//! Declarative workflow specifications

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::{McpError, McpResult};

/// One tool invocation inside a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Step name; derived from position when omitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Tool to invoke; must resolve in the catalog at compile time
    pub tool: String,

    /// Static parameters for the invocation
    #[serde(default)]
    pub params: Value,
}

/// A trigger attached to a reactive workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    /// Event name; fires on the `mcp:events:<event>` topic
    pub event: String,

    /// Payload field that must be truthy for the trigger to fire
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Debounce window in milliseconds
    #[serde(skip_serializing_if = "Option::is_none", rename = "delayMs")]
    pub delay_ms: Option<u64>,
}

/// The six workflow shapes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowSpec {
    /// Steps chained one after another; the final step's output is the
    /// workflow result
    Sequential { steps: Vec<StepSpec> },

    /// Independent steps, optionally joined by a merge step
    Parallel {
        steps: Vec<StepSpec>,
        #[serde(skip_serializing_if = "Option::is_none", rename = "mergeStep")]
        merge_step: Option<StepSpec>,
    },

    /// Condition step gating a success chain and a failure chain
    Conditional {
        condition: StepSpec,
        #[serde(default)]
        success: Vec<StepSpec>,
        #[serde(default)]
        failure: Vec<StepSpec>,
    },

    /// An independent chain per item, optionally aggregated
    Loop {
        items: Vec<Value>,
        steps: Vec<StepSpec>,
        #[serde(skip_serializing_if = "Option::is_none")]
        aggregator: Option<StepSpec>,
    },

    /// A base workflow executed whenever one of the triggers fires
    Reactive {
        base: Box<WorkflowSpec>,
        triggers: Vec<TriggerSpec>,
    },

    /// A named template instantiated with `{{var}}` substitution
    Template {
        template: String,
        #[serde(default)]
        params: HashMap<String, Value>,
    },
}

impl WorkflowSpec {
    /// Decode a workflow spec from its JSON form.
    pub fn from_value(value: Value) -> McpResult<WorkflowSpec> {
        serde_json::from_value(value)
            .map_err(|e| McpError::WorkflowCompilation {
                details: format!("invalid workflow spec: {}", e),
            })
    }

    /// The spec's type tag, for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowSpec::Sequential { .. } => "sequential",
            WorkflowSpec::Parallel { .. } => "parallel",
            WorkflowSpec::Conditional { .. } => "conditional",
            WorkflowSpec::Loop { .. } => "loop",
            WorkflowSpec::Reactive { .. } => "reactive",
            WorkflowSpec::Template { .. } => "template",
        }
    }

    /// Build the degenerate sequential spec for a multi-tool call.
    pub fn multi_tool(calls: Vec<(String, Value)>) -> WorkflowSpec {
        WorkflowSpec::Sequential {
            steps: calls
                .into_iter()
                .map(|(tool, params)| StepSpec {
                    name: None,
                    tool,
                    params,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_sequential() {
        let spec = WorkflowSpec::from_value(json!({
            "type": "sequential",
            "steps": [
                {"tool": "fetch", "params": {"uri": "workspace://doc/1"}},
                {"tool": "summarize"}
            ]
        }))
        .unwrap();

        match spec {
            WorkflowSpec::Sequential { steps } => {
                assert_eq!(steps.len(), 2);
                assert_eq!(steps[0].tool, "fetch");
                assert_eq!(steps[1].params, Value::Null);
            }
            other => panic!("expected sequential, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_parallel_with_merge() {
        let spec = WorkflowSpec::from_value(json!({
            "type": "parallel",
            "steps": [{"tool": "a"}, {"tool": "b"}],
            "mergeStep": {"tool": "m"}
        }))
        .unwrap();
        assert_eq!(spec.kind(), "parallel");
    }

    #[test]
    fn test_decode_conditional_defaults() {
        let spec = WorkflowSpec::from_value(json!({
            "type": "conditional",
            "condition": {"tool": "check"}
        }))
        .unwrap();
        match spec {
            WorkflowSpec::Conditional { success, failure, .. } => {
                assert!(success.is_empty());
                assert!(failure.is_empty());
            }
            other => panic!("expected conditional, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = WorkflowSpec::from_value(json!({"type": "mystery"})).unwrap_err();
        assert!(matches!(err, McpError::WorkflowCompilation { .. }));
    }

    #[test]
    fn test_multi_tool_is_sequential() {
        let spec = WorkflowSpec::multi_tool(vec![
            ("a".to_string(), json!({})),
            ("b".to_string(), json!({"x": 1})),
        ]);
        assert_eq!(spec.kind(), "sequential");
    }
}
