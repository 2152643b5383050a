//! Workflow execution: concurrent topological walk with streaming
//! events, shared context and cooperative cancellation

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use uuid::Uuid;

use super::graph::{compile, Guard, ResultSpec, Step, WorkflowGraph};
use super::spec::WorkflowSpec;
use crate::bridge::{ToolCatalog, ToolInvocation};
use crate::config::WorkflowConfig;
use crate::metrics::{names, MetricsRegistry};
use crate::registry::TemplateRegistry;
use crate::{McpError, McpResult};

/// Events emitted onto the streaming channel
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    WorkflowStarted { workflow_id: String },
    StepStarted { name: String },
    StepCompleted { name: String, output: Value },
    StepFailed { name: String, error: String },
    WorkflowCompleted { result: Value },
    WorkflowFailed { error: String },
}

impl WorkflowEvent {
    /// Wire form for sessions forwarding events as notifications.
    pub fn to_value(&self) -> Value {
        match self {
            WorkflowEvent::WorkflowStarted { workflow_id } => {
                serde_json::json!({"event": "workflow_started", "workflowId": workflow_id})
            }
            WorkflowEvent::StepStarted { name } => {
                serde_json::json!({"event": "step_started", "name": name})
            }
            WorkflowEvent::StepCompleted { name, output } => {
                serde_json::json!({"event": "step_completed", "name": name, "output": output})
            }
            WorkflowEvent::StepFailed { name, error } => {
                serde_json::json!({"event": "step_failed", "name": name, "error": error})
            }
            WorkflowEvent::WorkflowCompleted { result } => {
                serde_json::json!({"event": "workflow_completed", "result": result})
            }
            WorkflowEvent::WorkflowFailed { error } => {
                serde_json::json!({"event": "workflow_failed", "error": error})
            }
        }
    }
}

/// Per-execution options
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Initial shared context, merged into the per-execution map
    pub context: HashMap<String, Value>,

    /// Workflow-level timeout override
    pub timeout: Option<Duration>,

    /// Whether to open a streaming event channel
    pub streaming: bool,

    /// Session on whose behalf the workflow runs
    pub session_id: String,
}

/// A running workflow
pub struct WorkflowExecution {
    pub id: String,

    /// Present when streaming was requested
    pub events: Option<mpsc::UnboundedReceiver<WorkflowEvent>>,

    handle: tokio::task::JoinHandle<McpResult<Value>>,
}

impl WorkflowExecution {
    /// Await the workflow result.
    pub async fn result(self) -> McpResult<Value> {
        self.handle.await.map_err(|e| McpError::WorkflowExecution {
            details: format!("execution task failed: {}", e),
        })?
    }
}

#[derive(Clone)]
struct EventSink(Option<mpsc::UnboundedSender<WorkflowEvent>>);

impl EventSink {
    fn emit(&self, event: WorkflowEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event);
        }
    }
}

/// Compiles and executes workflow specs against the tool catalog
pub struct WorkflowEngine {
    catalog: Arc<dyn ToolCatalog>,
    templates: Arc<dyn TemplateRegistry>,
    config: WorkflowConfig,
    metrics: MetricsRegistry,
}

impl WorkflowEngine {
    pub fn new(
        catalog: Arc<dyn ToolCatalog>,
        templates: Arc<dyn TemplateRegistry>,
        config: WorkflowConfig,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            catalog,
            templates,
            config,
            metrics,
        }
    }

    pub fn templates(&self) -> Arc<dyn TemplateRegistry> {
        self.templates.clone()
    }

    /// Compile a spec without executing it, for validation.
    pub async fn compile_only(&self, spec: WorkflowSpec) -> McpResult<WorkflowGraph> {
        compile(spec, &self.catalog, &self.templates).await
    }

    /// Compile and start a workflow.
    pub async fn execute(
        &self,
        spec: WorkflowSpec,
        options: ExecutionOptions,
    ) -> McpResult<WorkflowExecution> {
        let graph = compile(spec, &self.catalog, &self.templates).await?;
        self.execute_graph(graph, options).await
    }

    /// Run a pre-compiled graph.
    pub async fn execute_graph(
        &self,
        graph: WorkflowGraph,
        options: ExecutionOptions,
    ) -> McpResult<WorkflowExecution> {
        let workflow_id = Uuid::new_v4().to_string();
        let timeout = options
            .timeout
            .unwrap_or(Duration::from_millis(self.config.timeout_ms));

        let (events_tx, events_rx) = if options.streaming {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let sink = EventSink(events_tx);

        self.metrics.incr(names::WORKFLOW_EXECUTIONS).await;

        let shared_context = Arc::new(options.context);
        let catalog = self.catalog.clone();
        let fan_out = self.config.max_fan_out.max(1);
        let session_id = options.session_id;
        let metrics = self.metrics.clone();
        let id = workflow_id.clone();

        let handle = tokio::spawn(async move {
            sink.emit(WorkflowEvent::WorkflowStarted {
                workflow_id: id.clone(),
            });

            let (cancel_tx, cancel_rx) = watch::channel(false);
            let run = run_graph(
                catalog,
                graph,
                shared_context,
                fan_out,
                session_id,
                cancel_rx,
                sink.clone(),
            );

            match tokio::time::timeout(timeout, run).await {
                Ok(Ok(result)) => {
                    sink.emit(WorkflowEvent::WorkflowCompleted {
                        result: result.clone(),
                    });
                    Ok(result)
                }
                Ok(Err(err)) => {
                    metrics.incr(names::WORKFLOW_FAILURES).await;
                    sink.emit(WorkflowEvent::WorkflowFailed {
                        error: err.to_string(),
                    });
                    Err(err)
                }
                Err(_) => {
                    // Cooperative cancel for steps still in flight
                    let _ = cancel_tx.send(true);
                    metrics.incr(names::WORKFLOW_FAILURES).await;
                    let err = McpError::WorkflowExecution {
                        details: format!("workflow timed out after {}ms", timeout.as_millis()),
                    };
                    sink.emit(WorkflowEvent::WorkflowFailed {
                        error: err.to_string(),
                    });
                    Err(err)
                }
            }
        });

        Ok(WorkflowExecution {
            id: workflow_id,
            events: events_rx,
            handle,
        })
    }
}

#[derive(Debug, Clone)]
enum StepStatus {
    Pending,
    Running,
    Done(Value),
    Failed(String),
    Skipped,
}

enum Readiness {
    Ready,
    Wait,
    Skip,
}

async fn run_graph(
    catalog: Arc<dyn ToolCatalog>,
    graph: WorkflowGraph,
    shared_context: Arc<HashMap<String, Value>>,
    fan_out: usize,
    session_id: String,
    cancel: watch::Receiver<bool>,
    sink: EventSink,
) -> McpResult<Value> {
    let mut status: HashMap<String, StepStatus> = graph
        .steps
        .keys()
        .map(|name| (name.clone(), StepStatus::Pending))
        .collect();

    let semaphore = Arc::new(Semaphore::new(fan_out));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(String, Result<Value, String>)>();
    let mut running = 0usize;

    loop {
        // Scheduling pass: spawn every ready step, resolve skips, repeat
        // until the frontier is stable.
        let mut progressed = true;
        while progressed {
            progressed = false;
            for name in &graph.order {
                if !matches!(status[name], StepStatus::Pending) {
                    continue;
                }
                let step = &graph.steps[name];
                match readiness(step, &status) {
                    Readiness::Ready => {
                        let params = bind_params(step, &status);
                        status.insert(name.clone(), StepStatus::Running);
                        running += 1;
                        progressed = true;
                        sink.emit(WorkflowEvent::StepStarted { name: name.clone() });
                        spawn_step(
                            catalog.clone(),
                            step.clone(),
                            params,
                            shared_context.clone(),
                            session_id.clone(),
                            cancel.clone(),
                            semaphore.clone(),
                            done_tx.clone(),
                        );
                    }
                    Readiness::Skip => {
                        status.insert(name.clone(), StepStatus::Skipped);
                        progressed = true;
                    }
                    Readiness::Wait => {}
                }
            }
        }

        if running == 0 {
            break;
        }

        let (name, result) = match done_rx.recv().await {
            Some(done) => done,
            None => break,
        };
        running -= 1;
        match result {
            Ok(output) => {
                sink.emit(WorkflowEvent::StepCompleted {
                    name: name.clone(),
                    output: output.clone(),
                });
                status.insert(name, StepStatus::Done(output));
            }
            Err(error) => {
                sink.emit(WorkflowEvent::StepFailed {
                    name: name.clone(),
                    error: error.clone(),
                });
                status.insert(name, StepStatus::Failed(error));
            }
        }
    }

    resolve_result(&graph, &status)
}

#[allow(clippy::too_many_arguments)]
fn spawn_step(
    catalog: Arc<dyn ToolCatalog>,
    step: Step,
    params: Value,
    shared_context: Arc<HashMap<String, Value>>,
    session_id: String,
    cancel: watch::Receiver<bool>,
    semaphore: Arc<Semaphore>,
    done: mpsc::UnboundedSender<(String, Result<Value, String>)>,
) {
    tokio::spawn(async move {
        let _permit = semaphore.acquire_owned().await;
        if *cancel.borrow() {
            let _ = done.send((step.name.clone(), Err("cancelled".to_string())));
            return;
        }

        let invocation = ToolInvocation::new(session_id)
            .with_cancel(cancel)
            .with_shared_context(shared_context);

        let result = catalog
            .execute(&step.tool, params, invocation)
            .await
            .map(|output| match output {
                crate::bridge::ToolOutput::Text(text) => Value::String(text),
                crate::bridge::ToolOutput::Markdown(text) => Value::String(text),
                crate::bridge::ToolOutput::Json(value) => value,
            })
            .map_err(|e| e.to_string());

        let _ = done.send((step.name, result));
    });
}

fn readiness(step: &Step, status: &HashMap<String, StepStatus>) -> Readiness {
    let guard_condition = match &step.guard {
        Guard::Always => None,
        Guard::ConditionTruthy(condition) => {
            match &status[condition] {
                StepStatus::Done(value) if is_truthy(value) => {}
                StepStatus::Done(_) | StepStatus::Failed(_) | StepStatus::Skipped => {
                    return Readiness::Skip
                }
                _ => return Readiness::Wait,
            }
            Some(condition.as_str())
        }
        Guard::ConditionFalsy(condition) => {
            match &status[condition] {
                StepStatus::Done(value) if !is_truthy(value) => {}
                StepStatus::Failed(_) => {}
                StepStatus::Done(_) | StepStatus::Skipped => return Readiness::Skip,
                _ => return Readiness::Wait,
            }
            Some(condition.as_str())
        }
    };

    for dep in &step.deps {
        // The guard already settled the condition dependency
        if guard_condition == Some(dep.as_str()) {
            continue;
        }
        match &status[dep] {
            StepStatus::Done(_) => {}
            StepStatus::Failed(_) | StepStatus::Skipped => return Readiness::Skip,
            _ => return Readiness::Wait,
        }
    }
    Readiness::Ready
}

/// Bind dependency outputs into a step's params: a single inbound edge
/// becomes `input`, multiple edges bind under each predecessor's name.
fn bind_params(step: &Step, status: &HashMap<String, StepStatus>) -> Value {
    let mut params = match &step.params {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("params".to_string(), other.clone());
            map
        }
    };

    let dep_output = |name: &str| match &status[name] {
        StepStatus::Done(value) => value.clone(),
        _ => Value::Null,
    };

    match step.deps.as_slice() {
        [] => {}
        [single] => {
            params.insert("input".to_string(), dep_output(single));
        }
        many => {
            for dep in many {
                params.insert(dep.clone(), dep_output(dep));
            }
        }
    }
    Value::Object(params)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn resolve_result(graph: &WorkflowGraph, status: &HashMap<String, StepStatus>) -> McpResult<Value> {
    let first_failure = || {
        graph.order.iter().find_map(|name| match &status[name] {
            StepStatus::Failed(error) => Some(McpError::WorkflowExecution {
                details: format!("step {} failed: {}", name, error),
            }),
            _ => None,
        })
    };

    match &graph.result {
        ResultSpec::LastStep(name) => match &status[name] {
            StepStatus::Done(value) => Ok(value.clone()),
            StepStatus::Failed(error) => Err(McpError::WorkflowExecution {
                details: format!("step {} failed: {}", name, error),
            }),
            _ => Err(first_failure().unwrap_or_else(|| McpError::WorkflowExecution {
                details: format!("step {} did not run", name),
            })),
        },
        ResultSpec::AllOf(names) => {
            if let Some(err) = first_failure() {
                return Err(err);
            }
            let mut out = Map::new();
            for name in names {
                match &status[name] {
                    StepStatus::Done(value) => {
                        out.insert(name.clone(), value.clone());
                    }
                    _ => {
                        return Err(McpError::WorkflowExecution {
                            details: format!("step {} did not run", name),
                        })
                    }
                }
            }
            Ok(Value::Object(out))
        }
        ResultSpec::Branch {
            condition,
            success_terminal,
            failure_terminal,
        } => {
            let condition_status = &status[condition];
            let success_taken = matches!(condition_status, StepStatus::Done(v) if is_truthy(v));
            let terminal = if success_taken {
                success_terminal
            } else {
                failure_terminal
            };

            match terminal {
                Some(name) => match &status[name] {
                    StepStatus::Done(value) => Ok(value.clone()),
                    StepStatus::Failed(error) => Err(McpError::WorkflowExecution {
                        details: format!("step {} failed: {}", name, error),
                    }),
                    _ => Err(McpError::WorkflowExecution {
                        details: format!("branch step {} did not run", name),
                    }),
                },
                None => match condition_status {
                    // No branch to run; the condition output is the result
                    StepStatus::Done(value) => Ok(value.clone()),
                    StepStatus::Failed(error) => Err(McpError::WorkflowExecution {
                        details: format!("condition failed with no failure branch: {}", error),
                    }),
                    _ => Err(McpError::WorkflowExecution {
                        details: "condition did not run".to_string(),
                    }),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{ToolDescriptor, ToolOutput};
    use crate::registry::{InMemoryCatalog, InMemoryTemplateRegistry};
    use serde_json::json;

    async fn register(catalog: &InMemoryCatalog, name: &str) {
        let tool = name.to_string();
        catalog
            .register_tool(
                ToolDescriptor {
                    name: tool.clone(),
                    description: String::new(),
                    parameters: vec![],
                    category: String::new(),
                    version: String::new(),
                    execution: Default::default(),
                },
                move |params, _invocation| {
                    let tool = tool.clone();
                    async move {
                        match tool.as_str() {
                            "a" => Ok(ToolOutput::Text("a".into())),
                            "b" => Ok(ToolOutput::Text("b".into())),
                            "merge" => {
                                // Receives each predecessor's output by name
                                let left = params["left"].as_str().unwrap_or("?");
                                let right = params["right"].as_str().unwrap_or("?");
                                Ok(ToolOutput::Text(format!("{}+{}", left, right)))
                            }
                            "upper" => {
                                let input = params["input"].as_str().unwrap_or_default();
                                Ok(ToolOutput::Text(input.to_uppercase()))
                            }
                            "double" => {
                                let item = params["item"].as_i64().unwrap_or(0);
                                Ok(ToolOutput::Json(json!(item * 2)))
                            }
                            "sum" => {
                                let total: i64 = params
                                    .as_object()
                                    .map(|map| {
                                        map.values().filter_map(Value::as_i64).sum()
                                    })
                                    .unwrap_or(0);
                                Ok(ToolOutput::Json(json!(total)))
                            }
                            "truthy" => Ok(ToolOutput::Json(json!(true))),
                            "falsy" => Ok(ToolOutput::Json(json!(false))),
                            "boom" => Err(McpError::tool_execution_failed("boom", "exploded")),
                            "ctx" => Ok(ToolOutput::Json(json!("ctx"))),
                            "slow" => {
                                tokio::time::sleep(Duration::from_secs(30)).await;
                                Ok(ToolOutput::Text("late".into()))
                            }
                            other => Ok(ToolOutput::Text(other.to_string())),
                        }
                    }
                },
            )
            .await;
    }

    async fn engine_with(tools: &[&str]) -> WorkflowEngine {
        let catalog = InMemoryCatalog::new();
        for tool in tools {
            register(&catalog, tool).await;
        }
        WorkflowEngine::new(
            Arc::new(catalog),
            Arc::new(InMemoryTemplateRegistry::new()),
            WorkflowConfig::default(),
            MetricsRegistry::new(),
        )
    }

    fn options() -> ExecutionOptions {
        ExecutionOptions {
            session_id: "test-session".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sequential_pipes_input() {
        let engine = engine_with(&["a", "upper"]).await;
        let spec = WorkflowSpec::from_value(json!({
            "type": "sequential",
            "steps": [{"tool": "a"}, {"tool": "upper"}]
        }))
        .unwrap();

        let execution = engine.execute(spec, options()).await.unwrap();
        assert_eq!(execution.result().await.unwrap(), json!("A"));
    }

    #[tokio::test]
    async fn test_parallel_merge_receives_named_outputs() {
        let engine = engine_with(&["a", "b", "merge"]).await;
        let spec = WorkflowSpec::from_value(json!({
            "type": "parallel",
            "steps": [{"name": "left", "tool": "a"}, {"name": "right", "tool": "b"}],
            "mergeStep": {"tool": "merge"}
        }))
        .unwrap();

        let execution = engine.execute(spec, options()).await.unwrap();
        assert_eq!(execution.result().await.unwrap(), json!("a+b"));
    }

    #[tokio::test]
    async fn test_parallel_streaming_event_shape() {
        let engine = engine_with(&["a", "b", "merge"]).await;
        let spec = WorkflowSpec::from_value(json!({
            "type": "parallel",
            "steps": [{"name": "left", "tool": "a"}, {"name": "right", "tool": "b"}],
            "mergeStep": {"name": "merge", "tool": "merge"}
        }))
        .unwrap();

        let mut opts = options();
        opts.streaming = true;
        let mut execution = engine.execute(spec, opts).await.unwrap();
        let mut events = Vec::new();
        let mut rx = execution.events.take().unwrap();
        let result = execution.result().await.unwrap();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(result, json!("a+b"));

        let started: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                WorkflowEvent::StepStarted { name } => Some(name.as_str()),
                _ => None,
            })
            .collect();
        let completed: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                WorkflowEvent::StepCompleted { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect();

        // Exactly one started and one completed per step
        assert_eq!(started.len(), 3);
        assert_eq!(completed.len(), 3);
        // Merge starts only after both parallel steps complete
        let merge_started = events
            .iter()
            .position(|e| matches!(e, WorkflowEvent::StepStarted { name } if name == "merge"))
            .unwrap();
        for parallel_step in ["left", "right"] {
            let completed_at = events
                .iter()
                .position(|e| {
                    matches!(e, WorkflowEvent::StepCompleted { name, .. } if name == parallel_step)
                })
                .unwrap();
            assert!(completed_at < merge_started);
        }
        assert!(matches!(events.first(), Some(WorkflowEvent::WorkflowStarted { .. })));
        assert!(matches!(events.last(), Some(WorkflowEvent::WorkflowCompleted { .. })));
    }

    #[tokio::test]
    async fn test_conditional_takes_success_branch() {
        let engine = engine_with(&["truthy", "a", "b"]).await;
        let spec = WorkflowSpec::from_value(json!({
            "type": "conditional",
            "condition": {"tool": "truthy"},
            "success": [{"tool": "a"}],
            "failure": [{"tool": "b"}]
        }))
        .unwrap();

        let execution = engine.execute(spec, options()).await.unwrap();
        assert_eq!(execution.result().await.unwrap(), json!("a"));
    }

    #[tokio::test]
    async fn test_conditional_takes_failure_branch_on_falsy() {
        let engine = engine_with(&["falsy", "a", "b"]).await;
        let spec = WorkflowSpec::from_value(json!({
            "type": "conditional",
            "condition": {"tool": "falsy"},
            "success": [{"tool": "a"}],
            "failure": [{"tool": "b"}]
        }))
        .unwrap();

        let execution = engine.execute(spec, options()).await.unwrap();
        assert_eq!(execution.result().await.unwrap(), json!("b"));
    }

    #[tokio::test]
    async fn test_conditional_takes_failure_branch_on_error() {
        let engine = engine_with(&["boom", "a", "b"]).await;
        let spec = WorkflowSpec::from_value(json!({
            "type": "conditional",
            "condition": {"tool": "boom"},
            "success": [{"tool": "a"}],
            "failure": [{"tool": "b"}]
        }))
        .unwrap();

        let execution = engine.execute(spec, options()).await.unwrap();
        assert_eq!(execution.result().await.unwrap(), json!("b"));
    }

    #[tokio::test]
    async fn test_loop_with_aggregator() {
        let engine = engine_with(&["double", "sum"]).await;
        let spec = WorkflowSpec::from_value(json!({
            "type": "loop",
            "items": [1, 2, 3],
            "steps": [{"tool": "double"}],
            "aggregator": {"tool": "sum"}
        }))
        .unwrap();

        let execution = engine.execute(spec, options()).await.unwrap();
        assert_eq!(execution.result().await.unwrap(), json!(12));
    }

    #[tokio::test]
    async fn test_step_failure_fails_workflow() {
        let engine = engine_with(&["a", "boom"]).await;
        let spec = WorkflowSpec::from_value(json!({
            "type": "sequential",
            "steps": [{"tool": "a"}, {"tool": "boom"}]
        }))
        .unwrap();

        let execution = engine.execute(spec, options()).await.unwrap();
        let err = execution.result().await.unwrap_err();
        assert!(matches!(err, McpError::WorkflowExecution { .. }));
        assert!(err.to_string().contains("exploded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_workflow_timeout() {
        let engine = engine_with(&["slow"]).await;
        let spec = WorkflowSpec::from_value(json!({
            "type": "sequential",
            "steps": [{"tool": "slow"}]
        }))
        .unwrap();

        let mut opts = options();
        opts.timeout = Some(Duration::from_millis(100));
        let execution = engine.execute(spec, opts).await.unwrap();
        let err = execution.result().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_shared_context_reaches_steps() {
        let catalog = InMemoryCatalog::new();
        catalog
            .register_tool(
                ToolDescriptor {
                    name: "read-ctx".into(),
                    description: String::new(),
                    parameters: vec![],
                    category: String::new(),
                    version: String::new(),
                    execution: Default::default(),
                },
                |_params, invocation| async move {
                    let value = invocation
                        .shared_context
                        .as_ref()
                        .and_then(|ctx| ctx.get("tenant"))
                        .cloned()
                        .unwrap_or(Value::Null);
                    Ok(ToolOutput::Json(value))
                },
            )
            .await;
        let engine = WorkflowEngine::new(
            Arc::new(catalog),
            Arc::new(InMemoryTemplateRegistry::new()),
            WorkflowConfig::default(),
            MetricsRegistry::new(),
        );

        let spec = WorkflowSpec::from_value(json!({
            "type": "sequential",
            "steps": [{"tool": "read-ctx"}]
        }))
        .unwrap();

        let mut opts = options();
        opts.context.insert("tenant".into(), json!("acme"));
        let execution = engine.execute(spec, opts).await.unwrap();
        assert_eq!(execution.result().await.unwrap(), json!("acme"));
    }
}
