//! Registries: name → handle lookups for tools, connected clients and
//! workflow compositions, plus the workflow template store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::bridge::{
    ResourceData, ResourceDescriptor, ResourceUri, ToolCatalog, ToolDescriptor, ToolInvocation,
    ToolOutput,
};
use crate::protocol::{Prompt, PromptsGetResult};
use crate::{McpError, McpResult};

type ToolHandler =
    Box<dyn Fn(Value, ToolInvocation) -> BoxFuture<'static, McpResult<ToolOutput>> + Send + Sync>;

/// In-memory reference catalog backing the binary's default wiring and
/// the test suite. Real deployments adapt their own catalog to
/// [`ToolCatalog`].
pub struct InMemoryCatalog {
    tools: RwLock<HashMap<String, (ToolDescriptor, ToolHandler)>>,
    resources: RwLock<HashMap<String, (ResourceDescriptor, String)>>,
    prompts: RwLock<HashMap<String, (Prompt, PromptsGetResult)>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            resources: RwLock::new(HashMap::new()),
            prompts: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool with its handler.
    pub async fn register_tool<F, Fut>(&self, descriptor: ToolDescriptor, handler: F)
    where
        F: Fn(Value, ToolInvocation) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = McpResult<ToolOutput>> + Send + 'static,
    {
        let name = descriptor.name.clone();
        let boxed: ToolHandler =
            Box::new(move |params, invocation| Box::pin(handler(params, invocation)));
        self.tools.write().await.insert(name, (descriptor, boxed));
    }

    /// Register a readable resource with fixed content.
    pub async fn register_resource(&self, descriptor: ResourceDescriptor, content: String) {
        self.resources
            .write()
            .await
            .insert(descriptor.uri.clone(), (descriptor, content));
    }

    /// Register a prompt with its rendered form.
    pub async fn register_prompt(&self, prompt: Prompt, rendered: PromptsGetResult) {
        self.prompts
            .write()
            .await
            .insert(prompt.name.clone(), (prompt, rendered));
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolCatalog for InMemoryCatalog {
    async fn list(&self) -> Vec<ToolDescriptor> {
        let mut tools: Vec<ToolDescriptor> = self
            .tools
            .read()
            .await
            .values()
            .map(|(descriptor, _)| descriptor.clone())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    async fn get(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools
            .read()
            .await
            .get(name)
            .map(|(descriptor, _)| descriptor.clone())
    }

    async fn execute(
        &self,
        name: &str,
        params: Value,
        invocation: ToolInvocation,
    ) -> McpResult<ToolOutput> {
        let future = {
            let tools = self.tools.read().await;
            let (_, handler) = tools.get(name).ok_or_else(|| McpError::ToolNotFound {
                tool_name: name.to_string(),
            })?;
            handler(params, invocation)
        };
        future.await
    }

    async fn list_resources(&self) -> Vec<ResourceDescriptor> {
        let mut resources: Vec<ResourceDescriptor> = self
            .resources
            .read()
            .await
            .values()
            .map(|(descriptor, _)| descriptor.clone())
            .collect();
        resources.sort_by(|a, b| a.uri.cmp(&b.uri));
        resources
    }

    async fn read_resource(&self, uri: &ResourceUri) -> McpResult<ResourceData> {
        let resources = self.resources.read().await;
        let (descriptor, content) = resources
            .get(&uri.raw)
            .ok_or_else(|| McpError::resource_not_found(uri.raw.clone()))?;
        Ok(ResourceData {
            uri: descriptor.uri.clone(),
            text: content.clone(),
            mime_type: descriptor.mime_type.clone(),
        })
    }

    async fn list_prompts(&self) -> Vec<Prompt> {
        let mut prompts: Vec<Prompt> = self
            .prompts
            .read()
            .await
            .values()
            .map(|(prompt, _)| prompt.clone())
            .collect();
        prompts.sort_by(|a, b| a.name.cmp(&b.name));
        prompts
    }

    async fn get_prompt(
        &self,
        name: &str,
        _arguments: Option<&serde_json::Map<String, Value>>,
    ) -> McpResult<PromptsGetResult> {
        self.prompts
            .read()
            .await
            .get(name)
            .map(|(_, rendered)| rendered.clone())
            .ok_or_else(|| McpError::resource_not_found(format!("prompt:{}", name)))
    }
}

/// Handle for a connected client
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub session_id: String,
    pub client_name: String,
    pub client_version: String,
    pub connected_at: DateTime<Utc>,
}

/// Connected-client registry
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, ClientHandle>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, session_id: &str, client_name: &str, client_version: &str) {
        self.clients.write().await.insert(
            session_id.to_string(),
            ClientHandle {
                session_id: session_id.to_string(),
                client_name: client_name.to_string(),
                client_version: client_version.to_string(),
                connected_at: Utc::now(),
            },
        );
    }

    pub async fn unregister(&self, session_id: &str) {
        self.clients.write().await.remove(session_id);
    }

    pub async fn get(&self, session_id: &str) -> Option<ClientHandle> {
        self.clients.read().await.get(session_id).cloned()
    }

    pub async fn list(&self) -> Vec<ClientHandle> {
        self.clients.read().await.values().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.clients.read().await.len()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Named workflow compositions stored via workflows/create
pub struct CompositionRegistry {
    compositions: RwLock<HashMap<String, Value>>,
}

impl CompositionRegistry {
    pub fn new() -> Self {
        Self {
            compositions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn store(&self, name: &str, spec: Value) {
        self.compositions
            .write()
            .await
            .insert(name.to_string(), spec);
    }

    pub async fn get(&self, name: &str) -> Option<Value> {
        self.compositions.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.compositions.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for CompositionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A stored workflow template
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    pub name: String,
    pub description: Option<String>,
    pub variables: Vec<String>,
    pub spec: Value,
}

/// Template store with `{{var}}` instantiation
#[async_trait]
pub trait TemplateRegistry: Send + Sync {
    async fn list(&self) -> Vec<WorkflowTemplate>;

    async fn get(&self, name: &str) -> Option<WorkflowTemplate>;

    /// Substitute `{{var}}` placeholders from `vars` into the template's
    /// spec. Unresolved placeholders are an error.
    fn instantiate(
        &self,
        template: &WorkflowTemplate,
        vars: &HashMap<String, Value>,
    ) -> McpResult<Value> {
        substitute_placeholders(&template.spec, vars)
    }
}

/// In-memory template registry
pub struct InMemoryTemplateRegistry {
    templates: RwLock<HashMap<String, WorkflowTemplate>>,
}

impl InMemoryTemplateRegistry {
    pub fn new() -> Self {
        Self {
            templates: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, template: WorkflowTemplate) {
        self.templates
            .write()
            .await
            .insert(template.name.clone(), template);
    }
}

impl Default for InMemoryTemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TemplateRegistry for InMemoryTemplateRegistry {
    async fn list(&self) -> Vec<WorkflowTemplate> {
        let mut templates: Vec<WorkflowTemplate> =
            self.templates.read().await.values().cloned().collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        templates
    }

    async fn get(&self, name: &str) -> Option<WorkflowTemplate> {
        self.templates.read().await.get(name).cloned()
    }
}

/// Recursive `{{var}}` substitution. A string that is exactly one
/// placeholder takes the variable's value with its type; placeholders
/// embedded in longer strings are spliced in as text.
pub fn substitute_placeholders(
    value: &Value,
    vars: &HashMap<String, Value>,
) -> McpResult<Value> {
    match value {
        Value::String(s) => substitute_string(s, vars),
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| substitute_placeholders(item, vars))
                .collect::<McpResult<_>>()?,
        )),
        Value::Object(map) => Ok(Value::Object(
            map.iter()
                .map(|(key, val)| Ok((key.clone(), substitute_placeholders(val, vars)?)))
                .collect::<McpResult<_>>()?,
        )),
        other => Ok(other.clone()),
    }
}

fn substitute_string(s: &str, vars: &HashMap<String, Value>) -> McpResult<Value> {
    // Whole-string placeholder keeps the variable's JSON type
    if let Some(name) = s
        .strip_prefix("{{")
        .and_then(|rest| rest.strip_suffix("}}"))
    {
        let name = name.trim();
        if !name.is_empty() && !name.contains("{{") {
            return vars.get(name).cloned().ok_or_else(|| {
                McpError::invalid_params("workflows/execute", format!("unbound template variable {}", name))
            });
        }
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        let (head, tail) = rest.split_at(start);
        out.push_str(head);
        match tail[2..].find("}}") {
            Some(end) => {
                let name = tail[2..2 + end].trim();
                let value = vars.get(name).ok_or_else(|| {
                    McpError::invalid_params(
                        "workflows/execute",
                        format!("unbound template variable {}", name),
                    )
                })?;
                match value {
                    Value::String(s) => out.push_str(s),
                    other => out.push_str(&other.to_string()),
                }
                rest = &tail[2 + end + 2..];
            }
            None => {
                out.push_str(tail);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_catalog_tool_round_trip() {
        let catalog = InMemoryCatalog::new();
        catalog
            .register_tool(
                ToolDescriptor {
                    name: "add".into(),
                    description: "Add two numbers".into(),
                    parameters: vec![],
                    category: "math".into(),
                    version: "1.0".into(),
                    execution: Default::default(),
                },
                |params, _invocation| async move {
                    let a = params["a"].as_i64().unwrap_or(0);
                    let b = params["b"].as_i64().unwrap_or(0);
                    Ok(ToolOutput::Json(json!(a + b)))
                },
            )
            .await;

        assert!(catalog.get("add").await.is_some());
        assert!(catalog.get("sub").await.is_none());

        let output = catalog
            .execute("add", json!({"a": 2, "b": 3}), ToolInvocation::new("s"))
            .await
            .unwrap();
        assert_eq!(output, ToolOutput::Json(json!(5)));
    }

    #[tokio::test]
    async fn test_catalog_resources() {
        let catalog = InMemoryCatalog::new();
        catalog
            .register_resource(
                ResourceDescriptor {
                    uri: "workspace://doc/readme".into(),
                    name: "readme".into(),
                    description: None,
                    mime_type: Some("text/plain".into()),
                },
                "hello".into(),
            )
            .await;

        let uri = ResourceUri::parse("workspace://doc/readme").unwrap();
        let data = catalog.read_resource(&uri).await.unwrap();
        assert_eq!(data.text, "hello");

        let missing = ResourceUri::parse("workspace://doc/other").unwrap();
        assert!(catalog.read_resource(&missing).await.is_err());
    }

    #[tokio::test]
    async fn test_client_registry() {
        let registry = ClientRegistry::new();
        registry.register("s1", "client-a", "1.0").await;
        registry.register("s2", "client-b", "2.0").await;
        assert_eq!(registry.count().await, 2);

        registry.unregister("s1").await;
        assert_eq!(registry.count().await, 1);
        assert!(registry.get("s1").await.is_none());
        assert_eq!(registry.get("s2").await.unwrap().client_name, "client-b");
    }

    #[test]
    fn test_typed_placeholder_substitution() {
        let vars: HashMap<String, Value> = [
            ("items".to_string(), json!([1, 2, 3])),
            ("name".to_string(), json!("report")),
        ]
        .into();

        let spec = json!({
            "type": "loop",
            "items": "{{items}}",
            "step": {"tool": "summarize", "params": {"title": "{{name}}-summary"}}
        });

        let result = substitute_placeholders(&spec, &vars).unwrap();
        assert_eq!(result["items"], json!([1, 2, 3]));
        assert_eq!(result["step"]["params"]["title"], "report-summary");
    }

    #[test]
    fn test_unbound_variable_is_an_error() {
        let vars = HashMap::new();
        let spec = json!({"value": "{{missing}}"});
        assert!(substitute_placeholders(&spec, &vars).is_err());
    }

    #[tokio::test]
    async fn test_template_registry_instantiate() {
        let registry = InMemoryTemplateRegistry::new();
        registry
            .register(WorkflowTemplate {
                name: "summarize".into(),
                description: Some("Summarize a document".into()),
                variables: vec!["uri".into()],
                spec: json!({
                    "type": "sequential",
                    "steps": [{"tool": "fetch", "params": {"uri": "{{uri}}"}}]
                }),
            })
            .await;

        let template = registry.get("summarize").await.unwrap();
        let vars: HashMap<String, Value> =
            [("uri".to_string(), json!("workspace://doc/1"))].into();
        let spec = registry.instantiate(&template, &vars).unwrap();
        assert_eq!(spec["steps"][0]["params"]["uri"], "workspace://doc/1");
    }
}
