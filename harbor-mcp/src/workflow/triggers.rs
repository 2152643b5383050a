//! Reactive workflow triggers: event-bus driven execution with debounce

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::executor::{ExecutionOptions, WorkflowEngine};
use super::spec::{TriggerSpec, WorkflowSpec};
use crate::events::{topic_event, EventBus};
use crate::McpResult;

/// A registered trigger
#[derive(Debug, Clone)]
pub struct TriggerRegistration {
    pub id: Uuid,
    pub event: String,
    pub owner: String,
}

/// Registers reactive workflows against the event bus and executes their
/// base workflow when a trigger fires. Firing is debounced by the
/// trigger's delay: events arriving inside the window collapse into one
/// execution.
pub struct TriggerManager {
    bus: Arc<EventBus>,
    engine: Arc<WorkflowEngine>,
    registrations: RwLock<Vec<TriggerRegistration>>,
}

impl TriggerManager {
    pub fn new(bus: Arc<EventBus>, engine: Arc<WorkflowEngine>) -> Self {
        Self {
            bus,
            engine,
            registrations: RwLock::new(Vec::new()),
        }
    }

    /// Register a reactive workflow. The base workflow is compiled up
    /// front so broken specs fail at registration, not at fire time.
    pub async fn register(
        &self,
        base: WorkflowSpec,
        triggers: Vec<TriggerSpec>,
        owner: &str,
    ) -> McpResult<Vec<TriggerRegistration>> {
        self.engine.compile_only(base.clone()).await?;

        let mut registered = Vec::new();
        for trigger in triggers {
            let registration = TriggerRegistration {
                id: Uuid::new_v4(),
                event: trigger.event.clone(),
                owner: owner.to_string(),
            };
            registered.push(registration.clone());
            self.registrations.write().await.push(registration);

            let (_, mut rx) = self
                .bus
                .subscribe(&topic_event(&trigger.event), owner)
                .await;

            let engine = self.engine.clone();
            let base = base.clone();
            let owner = owner.to_string();
            let delay = trigger.delay_ms.map(Duration::from_millis);
            let condition = trigger.condition.clone();
            let event_name = trigger.event.clone();

            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    if !condition_holds(&condition, &event.payload) {
                        continue;
                    }

                    // Debounce: swallow events arriving within the window
                    if let Some(delay) = delay {
                        loop {
                            match tokio::time::timeout(delay, rx.recv()).await {
                                Ok(Some(next)) => {
                                    if !condition_holds(&condition, &next.payload) {
                                        continue;
                                    }
                                }
                                Ok(None) => return,
                                Err(_) => break,
                            }
                        }
                    }

                    tracing::debug!(event = %event_name, owner = %owner, "Trigger fired");
                    let options = ExecutionOptions {
                        context: HashMap::from([(
                            "trigger_event".to_string(),
                            event.payload.clone(),
                        )]),
                        session_id: owner.clone(),
                        ..Default::default()
                    };
                    match engine.execute(base.clone(), options).await {
                        Ok(execution) => {
                            if let Err(e) = execution.result().await {
                                tracing::warn!(event = %event_name, error = %e, "Triggered workflow failed");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(event = %event_name, error = %e, "Triggered workflow failed to start")
                        }
                    }
                }
            });
        }
        Ok(registered)
    }

    /// Drop an owner's trigger registrations (the bus releases its
    /// subscriptions separately, ending the listener tasks).
    pub async fn release_owner(&self, owner: &str) {
        self.registrations
            .write()
            .await
            .retain(|r| r.owner != owner);
        self.bus.release_owner(owner).await;
    }

    pub async fn registration_count(&self) -> usize {
        self.registrations.read().await.len()
    }
}

/// A trigger condition names a payload field that must be truthy.
fn condition_holds(condition: &Option<String>, payload: &Value) -> bool {
    match condition {
        None => true,
        Some(field) => payload
            .get(field)
            .map(|value| match value {
                Value::Null => false,
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
                Value::String(s) => !s.is_empty(),
                _ => true,
            })
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{ToolDescriptor, ToolOutput};
    use crate::config::WorkflowConfig;
    use crate::metrics::MetricsRegistry;
    use crate::registry::{InMemoryCatalog, InMemoryTemplateRegistry};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn counting_engine(counter: Arc<AtomicU32>) -> Arc<WorkflowEngine> {
        let catalog = InMemoryCatalog::new();
        catalog
            .register_tool(
                ToolDescriptor {
                    name: "count".into(),
                    description: String::new(),
                    parameters: vec![],
                    category: String::new(),
                    version: String::new(),
                    execution: Default::default(),
                },
                move |_params, _invocation| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(ToolOutput::Text("counted".into()))
                    }
                },
            )
            .await;
        Arc::new(WorkflowEngine::new(
            Arc::new(catalog),
            Arc::new(InMemoryTemplateRegistry::new()),
            WorkflowConfig::default(),
            MetricsRegistry::new(),
        ))
    }

    fn base_spec() -> WorkflowSpec {
        WorkflowSpec::from_value(json!({
            "type": "sequential",
            "steps": [{"tool": "count"}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_trigger_fires_on_event() {
        let counter = Arc::new(AtomicU32::new(0));
        let bus = Arc::new(EventBus::new());
        let manager = TriggerManager::new(bus.clone(), counting_engine(counter.clone()).await);

        manager
            .register(
                base_spec(),
                vec![TriggerSpec {
                    event: "doc-changed".into(),
                    condition: None,
                    delay_ms: None,
                }],
                "session-1",
            )
            .await
            .unwrap();

        bus.publish(&topic_event("doc-changed"), json!({})).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_condition_filters_events() {
        let counter = Arc::new(AtomicU32::new(0));
        let bus = Arc::new(EventBus::new());
        let manager = TriggerManager::new(bus.clone(), counting_engine(counter.clone()).await);

        manager
            .register(
                base_spec(),
                vec![TriggerSpec {
                    event: "doc-changed".into(),
                    condition: Some("important".into()),
                    delay_ms: None,
                }],
                "session-1",
            )
            .await
            .unwrap();

        bus.publish(&topic_event("doc-changed"), json!({"important": false}))
            .await;
        bus.publish(&topic_event("doc-changed"), json!({"important": true}))
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_debounce_collapses_bursts() {
        let counter = Arc::new(AtomicU32::new(0));
        let bus = Arc::new(EventBus::new());
        let manager = TriggerManager::new(bus.clone(), counting_engine(counter.clone()).await);

        manager
            .register(
                base_spec(),
                vec![TriggerSpec {
                    event: "burst".into(),
                    condition: None,
                    delay_ms: Some(50),
                }],
                "session-1",
            )
            .await
            .unwrap();

        for _ in 0..5 {
            bus.publish(&topic_event("burst"), json!({})).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_owner_stops_triggers() {
        let counter = Arc::new(AtomicU32::new(0));
        let bus = Arc::new(EventBus::new());
        let manager = TriggerManager::new(bus.clone(), counting_engine(counter.clone()).await);

        manager
            .register(
                base_spec(),
                vec![TriggerSpec {
                    event: "gone".into(),
                    condition: None,
                    delay_ms: None,
                }],
                "session-1",
            )
            .await
            .unwrap();
        assert_eq!(manager.registration_count().await, 1);

        manager.release_owner("session-1").await;
        assert_eq!(manager.registration_count().await, 0);

        bus.publish(&topic_event("gone"), json!({})).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_broken_base_spec_rejected_at_registration() {
        let bus = Arc::new(EventBus::new());
        let manager = TriggerManager::new(
            bus,
            counting_engine(Arc::new(AtomicU32::new(0))).await,
        );

        let broken = WorkflowSpec::from_value(json!({
            "type": "sequential",
            "steps": [{"tool": "missing"}]
        }))
        .unwrap();

        let result = manager
            .register(
                broken,
                vec![TriggerSpec {
                    event: "x".into(),
                    condition: None,
                    delay_ms: None,
                }],
                "session-1",
            )
            .await;
        assert!(result.is_err());
    }
}
