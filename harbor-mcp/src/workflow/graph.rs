//! Workflow compilation: specs become executable step DAGs

use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use super::spec::{StepSpec, WorkflowSpec};
use crate::bridge::ToolCatalog;
use crate::registry::TemplateRegistry;
use crate::{McpError, McpResult};

/// Nesting allowed while resolving templates
const MAX_TEMPLATE_DEPTH: u32 = 8;

/// Gate deciding whether a step runs once its dependencies settle
#[derive(Debug, Clone, PartialEq)]
pub enum Guard {
    Always,
    /// Runs only when the named condition step succeeded with a truthy
    /// output
    ConditionTruthy(String),
    /// Runs only when the named condition step failed or produced a
    /// falsy output
    ConditionFalsy(String),
}

/// One compiled step
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub tool: String,
    pub params: Value,
    pub deps: Vec<String>,
    pub guard: Guard,
}

/// How the workflow result is read off the settled graph
#[derive(Debug, Clone, PartialEq)]
pub enum ResultSpec {
    /// Output of one terminal step
    LastStep(String),
    /// Object keyed by step name (parallel without a merge step)
    AllOf(Vec<String>),
    /// Output of whichever conditional branch executed
    Branch {
        condition: String,
        success_terminal: Option<String>,
        failure_terminal: Option<String>,
    },
}

/// A compiled, validated workflow DAG
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    pub steps: HashMap<String, Step>,
    /// Topological order; also the scheduling order for ties
    pub order: Vec<String>,
    pub result: ResultSpec,
}

impl WorkflowGraph {
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

/// Compile a spec against the catalog, resolving templates through the
/// registry. Every referenced tool must exist and the graph must be
/// acyclic.
pub async fn compile(
    spec: WorkflowSpec,
    catalog: &Arc<dyn ToolCatalog>,
    templates: &Arc<dyn TemplateRegistry>,
) -> McpResult<WorkflowGraph> {
    compile_inner(spec, catalog, templates, 0).await
}

async fn compile_inner(
    spec: WorkflowSpec,
    catalog: &Arc<dyn ToolCatalog>,
    templates: &Arc<dyn TemplateRegistry>,
    depth: u32,
) -> McpResult<WorkflowGraph> {
    if depth > MAX_TEMPLATE_DEPTH {
        return Err(McpError::WorkflowCompilation {
            details: "template nesting too deep".to_string(),
        });
    }

    let graph = match spec {
        WorkflowSpec::Sequential { steps } => compile_sequential(steps)?,
        WorkflowSpec::Parallel { steps, merge_step } => compile_parallel(steps, merge_step)?,
        WorkflowSpec::Conditional {
            condition,
            success,
            failure,
        } => compile_conditional(condition, success, failure)?,
        WorkflowSpec::Loop {
            items,
            steps,
            aggregator,
        } => compile_loop(items, steps, aggregator)?,
        WorkflowSpec::Reactive { .. } => {
            return Err(McpError::WorkflowCompilation {
                details: "reactive workflows are registered, not compiled directly".to_string(),
            })
        }
        WorkflowSpec::Template { template, params } => {
            let stored = templates.get(&template).await.ok_or_else(|| {
                McpError::WorkflowCompilation {
                    details: format!("unknown template: {}", template),
                }
            })?;
            let instantiated = templates.instantiate(&stored, &params)?;
            let inner = WorkflowSpec::from_value(instantiated)?;
            return Box::pin(compile_inner(inner, catalog, templates, depth + 1)).await;
        }
    };

    validate(&graph, catalog).await?;
    Ok(graph)
}

fn step_name(spec: &StepSpec, fallback: String) -> String {
    spec.name.clone().unwrap_or(fallback)
}

fn chain(
    steps: Vec<StepSpec>,
    prefix: &str,
    first_deps: Vec<String>,
    guard: Guard,
) -> (Vec<Step>, Option<String>) {
    let mut compiled = Vec::new();
    let mut previous: Option<String> = None;

    for (i, spec) in steps.into_iter().enumerate() {
        let name = step_name(&spec, format!("{}{}", prefix, i + 1));
        let deps = match &previous {
            Some(prev) => vec![prev.clone()],
            None => first_deps.clone(),
        };
        compiled.push(Step {
            name: name.clone(),
            tool: spec.tool,
            params: spec.params,
            deps,
            guard: guard.clone(),
        });
        previous = Some(name);
    }
    (compiled, previous)
}

fn build(steps: Vec<Step>, result: ResultSpec) -> McpResult<WorkflowGraph> {
    let mut map = HashMap::new();
    for step in steps {
        if map.insert(step.name.clone(), step).is_some() {
            return Err(McpError::WorkflowCompilation {
                details: "duplicate step name".to_string(),
            });
        }
    }
    let order = topological_order(&map)?;
    Ok(WorkflowGraph {
        steps: map,
        order,
        result,
    })
}

fn compile_sequential(steps: Vec<StepSpec>) -> McpResult<WorkflowGraph> {
    if steps.is_empty() {
        return Err(McpError::WorkflowCompilation {
            details: "sequential workflow requires at least one step".to_string(),
        });
    }
    let (compiled, last) = chain(steps, "step_", vec![], Guard::Always);
    let last = last.expect("non-empty chain has a terminal");
    build(compiled, ResultSpec::LastStep(last))
}

fn compile_parallel(
    steps: Vec<StepSpec>,
    merge_step: Option<StepSpec>,
) -> McpResult<WorkflowGraph> {
    if steps.is_empty() {
        return Err(McpError::WorkflowCompilation {
            details: "parallel workflow requires at least one step".to_string(),
        });
    }

    let mut compiled = Vec::new();
    let mut names = Vec::new();
    for (i, spec) in steps.into_iter().enumerate() {
        let name = step_name(&spec, format!("step_{}", i + 1));
        names.push(name.clone());
        compiled.push(Step {
            name,
            tool: spec.tool,
            params: spec.params,
            deps: vec![],
            guard: Guard::Always,
        });
    }

    let result = match merge_step {
        Some(spec) => {
            let name = step_name(&spec, "merge".to_string());
            compiled.push(Step {
                name: name.clone(),
                tool: spec.tool,
                params: spec.params,
                deps: names,
                guard: Guard::Always,
            });
            ResultSpec::LastStep(name)
        }
        None => ResultSpec::AllOf(names),
    };
    build(compiled, result)
}

fn compile_conditional(
    condition: StepSpec,
    success: Vec<StepSpec>,
    failure: Vec<StepSpec>,
) -> McpResult<WorkflowGraph> {
    let condition_name = step_name(&condition, "condition".to_string());
    let mut compiled = vec![Step {
        name: condition_name.clone(),
        tool: condition.tool,
        params: condition.params,
        deps: vec![],
        guard: Guard::Always,
    }];

    let (success_steps, success_terminal) = chain(
        success,
        "success_",
        vec![condition_name.clone()],
        Guard::ConditionTruthy(condition_name.clone()),
    );
    let (failure_steps, failure_terminal) = chain(
        failure,
        "failure_",
        vec![condition_name.clone()],
        Guard::ConditionFalsy(condition_name.clone()),
    );
    compiled.extend(success_steps);
    compiled.extend(failure_steps);

    build(
        compiled,
        ResultSpec::Branch {
            condition: condition_name,
            success_terminal,
            failure_terminal,
        },
    )
}

fn compile_loop(
    items: Vec<Value>,
    steps: Vec<StepSpec>,
    aggregator: Option<StepSpec>,
) -> McpResult<WorkflowGraph> {
    if steps.is_empty() {
        return Err(McpError::WorkflowCompilation {
            details: "loop workflow requires at least one step".to_string(),
        });
    }

    let mut compiled = Vec::new();
    let mut terminals = Vec::new();

    for (i, item) in items.into_iter().enumerate() {
        let prefix = format!("item_{}_", i + 1);
        let mut chain_steps = steps.clone();

        // Bind the loop item into the first step of the chain
        if let Some(first) = chain_steps.first_mut() {
            let mut params = match first.params.take() {
                Value::Object(map) => map,
                Value::Null => serde_json::Map::new(),
                other => {
                    let mut map = serde_json::Map::new();
                    map.insert("params".to_string(), other);
                    map
                }
            };
            params.insert("item".to_string(), item);
            first.params = Value::Object(params);
        }

        let mut chain_compiled = Vec::new();
        let mut previous: Option<String> = None;
        for (j, spec) in chain_steps.into_iter().enumerate() {
            let name = match &spec.name {
                Some(name) => format!("{}{}", prefix, name),
                None => format!("{}step_{}", prefix, j + 1),
            };
            let deps = previous.clone().map(|p| vec![p]).unwrap_or_default();
            chain_compiled.push(Step {
                name: name.clone(),
                tool: spec.tool,
                params: spec.params,
                deps,
                guard: Guard::Always,
            });
            previous = Some(name);
        }
        if let Some(terminal) = previous {
            terminals.push(terminal);
        }
        compiled.extend(chain_compiled);
    }

    let result = match aggregator {
        Some(spec) => {
            let name = step_name(&spec, "aggregate".to_string());
            compiled.push(Step {
                name: name.clone(),
                tool: spec.tool,
                params: spec.params,
                deps: terminals,
                guard: Guard::Always,
            });
            ResultSpec::LastStep(name)
        }
        None => ResultSpec::AllOf(terminals),
    };
    build(compiled, result)
}

/// Kahn's algorithm; a leftover node means a cycle.
fn topological_order(steps: &HashMap<String, Step>) -> McpResult<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for step in steps.values() {
        in_degree.entry(&step.name).or_insert(0);
        for dep in &step.deps {
            if !steps.contains_key(dep) {
                return Err(McpError::WorkflowCompilation {
                    details: format!("step {} depends on unknown step {}", step.name, dep),
                });
            }
            *in_degree.entry(&step.name).or_insert(0) += 1;
            dependents.entry(dep.as_str()).or_default().push(&step.name);
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut order = Vec::with_capacity(steps.len());
    let mut seen = HashSet::new();

    while let Some(name) = queue.pop_front() {
        if !seen.insert(name) {
            continue;
        }
        order.push(name.to_string());
        for dependent in dependents.get(name).into_iter().flatten() {
            let degree = in_degree.get_mut(dependent).expect("known node");
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if order.len() != steps.len() {
        return Err(McpError::WorkflowCompilation {
            details: "workflow graph contains a cycle".to_string(),
        });
    }
    Ok(order)
}

/// Tool resolution happens at compile time, not execution time.
async fn validate(graph: &WorkflowGraph, catalog: &Arc<dyn ToolCatalog>) -> McpResult<()> {
    let mut checked = HashSet::new();
    for step in graph.steps.values() {
        if checked.insert(step.tool.clone()) && catalog.get(&step.tool).await.is_none() {
            return Err(McpError::WorkflowCompilation {
                details: format!("unknown tool: {}", step.tool),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{ToolDescriptor, ToolOutput};
    use crate::registry::{InMemoryCatalog, InMemoryTemplateRegistry, WorkflowTemplate};
    use serde_json::json;

    async fn catalog_with(tools: &[&str]) -> Arc<dyn ToolCatalog> {
        let catalog = InMemoryCatalog::new();
        for tool in tools {
            catalog
                .register_tool(
                    ToolDescriptor {
                        name: tool.to_string(),
                        description: String::new(),
                        parameters: vec![],
                        category: String::new(),
                        version: String::new(),
                        execution: Default::default(),
                    },
                    |_params, _invocation| async move { Ok(ToolOutput::Text("ok".into())) },
                )
                .await;
        }
        Arc::new(catalog)
    }

    fn registry() -> Arc<dyn TemplateRegistry> {
        Arc::new(InMemoryTemplateRegistry::new())
    }

    #[tokio::test]
    async fn test_sequential_chain_shape() {
        let catalog = catalog_with(&["a", "b", "c"]).await;
        let spec = WorkflowSpec::from_value(json!({
            "type": "sequential",
            "steps": [{"tool": "a"}, {"tool": "b"}, {"tool": "c"}]
        }))
        .unwrap();

        let graph = compile(spec, &catalog, &registry()).await.unwrap();
        assert_eq!(graph.step_count(), 3);
        assert_eq!(graph.steps["step_1"].deps.len(), 0);
        assert_eq!(graph.steps["step_2"].deps, vec!["step_1"]);
        assert_eq!(graph.steps["step_3"].deps, vec!["step_2"]);
        assert_eq!(graph.result, ResultSpec::LastStep("step_3".into()));
    }

    #[tokio::test]
    async fn test_parallel_with_merge() {
        let catalog = catalog_with(&["a", "b", "m"]).await;
        let spec = WorkflowSpec::from_value(json!({
            "type": "parallel",
            "steps": [{"name": "left", "tool": "a"}, {"name": "right", "tool": "b"}],
            "mergeStep": {"name": "join", "tool": "m"}
        }))
        .unwrap();

        let graph = compile(spec, &catalog, &registry()).await.unwrap();
        assert!(graph.steps["left"].deps.is_empty());
        assert!(graph.steps["right"].deps.is_empty());
        let mut merge_deps = graph.steps["join"].deps.clone();
        merge_deps.sort();
        assert_eq!(merge_deps, vec!["left", "right"]);
        // Merge comes after both in topological order
        let position = |name: &str| graph.order.iter().position(|n| n == name).unwrap();
        assert!(position("join") > position("left"));
        assert!(position("join") > position("right"));
    }

    #[tokio::test]
    async fn test_conditional_guards() {
        let catalog = catalog_with(&["check", "yes", "no"]).await;
        let spec = WorkflowSpec::from_value(json!({
            "type": "conditional",
            "condition": {"tool": "check"},
            "success": [{"tool": "yes"}],
            "failure": [{"tool": "no"}]
        }))
        .unwrap();

        let graph = compile(spec, &catalog, &registry()).await.unwrap();
        assert_eq!(
            graph.steps["success_1"].guard,
            Guard::ConditionTruthy("condition".into())
        );
        assert_eq!(
            graph.steps["failure_1"].guard,
            Guard::ConditionFalsy("condition".into())
        );
    }

    #[tokio::test]
    async fn test_loop_instantiates_chain_per_item() {
        let catalog = catalog_with(&["work", "agg"]).await;
        let spec = WorkflowSpec::from_value(json!({
            "type": "loop",
            "items": [1, 2, 3],
            "steps": [{"tool": "work"}],
            "aggregator": {"tool": "agg"}
        }))
        .unwrap();

        let graph = compile(spec, &catalog, &registry()).await.unwrap();
        // 3 item chains + aggregator
        assert_eq!(graph.step_count(), 4);
        assert_eq!(graph.steps["item_1_step_1"].params["item"], 1);
        assert_eq!(graph.steps["item_3_step_1"].params["item"], 3);
        assert_eq!(graph.steps["aggregate"].deps.len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_compilation() {
        let catalog = catalog_with(&["a"]).await;
        let spec = WorkflowSpec::from_value(json!({
            "type": "sequential",
            "steps": [{"tool": "a"}, {"tool": "ghost"}]
        }))
        .unwrap();

        let err = compile(spec, &catalog, &registry()).await.unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn test_template_resolution() {
        let catalog = catalog_with(&["fetch"]).await;
        let templates = InMemoryTemplateRegistry::new();
        templates
            .register(WorkflowTemplate {
                name: "fetch-one".into(),
                description: None,
                variables: vec!["uri".into()],
                spec: json!({
                    "type": "sequential",
                    "steps": [{"tool": "fetch", "params": {"uri": "{{uri}}"}}]
                }),
            })
            .await;
        let templates: Arc<dyn TemplateRegistry> = Arc::new(templates);

        let spec = WorkflowSpec::from_value(json!({
            "type": "template",
            "template": "fetch-one",
            "params": {"uri": "workspace://doc/9"}
        }))
        .unwrap();

        let graph = compile(spec, &catalog, &templates).await.unwrap();
        assert_eq!(
            graph.steps["step_1"].params["uri"],
            "workspace://doc/9"
        );
    }

    #[tokio::test]
    async fn test_empty_sequential_rejected() {
        let catalog = catalog_with(&[]).await;
        let spec = WorkflowSpec::from_value(json!({"type": "sequential", "steps": []})).unwrap();
        assert!(compile(spec, &catalog, &registry()).await.is_err());
    }
}
