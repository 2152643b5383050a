//! Capability advertisement for the initialize handshake

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Capabilities advertised by a client during initialize
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub experimental: HashMap<String, Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingCapability>,
}

/// Capabilities advertised by the server during initialize
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub experimental: HashMap<String, Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingCapability>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapability>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

impl Default for ServerCapabilities {
    /// Baseline advertisement: tools/resources/prompts change
    /// notifications, resource subscriptions, experimental streaming.
    fn default() -> Self {
        let mut experimental = HashMap::new();
        experimental.insert("streaming".to_string(), Value::Bool(true));

        Self {
            experimental,
            logging: Some(LoggingCapability {}),
            prompts: Some(PromptsCapability { list_changed: true }),
            resources: Some(ResourcesCapability {
                subscribe: true,
                list_changed: true,
            }),
            tools: Some(ToolsCapability { list_changed: true }),
        }
    }
}

impl ServerCapabilities {
    /// Apply operator-configured overrides on top of the defaults.
    /// A set override always wins over the default.
    pub fn with_overrides(mut self, overrides: &CapabilityOverrides) -> Self {
        if let Some(subscribe) = overrides.resources_subscribe {
            if let Some(res) = self.resources.as_mut() {
                res.subscribe = subscribe;
            }
        }
        if let Some(list_changed) = overrides.resources_list_changed {
            if let Some(res) = self.resources.as_mut() {
                res.list_changed = list_changed;
            }
        }
        if let Some(list_changed) = overrides.tools_list_changed {
            if let Some(tools) = self.tools.as_mut() {
                tools.list_changed = list_changed;
            }
        }
        if let Some(list_changed) = overrides.prompts_list_changed {
            if let Some(prompts) = self.prompts.as_mut() {
                prompts.list_changed = list_changed;
            }
        }
        for (key, value) in &overrides.experimental {
            self.experimental.insert(key.clone(), value.clone());
        }
        self
    }
}

/// Operator overrides merged into the default advertisement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools_list_changed: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources_subscribe: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources_list_changed: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts_list_changed: Option<bool>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub experimental: HashMap<String, Value>,
}

/// Sampling capability marker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingCapability {}

/// Logging capability marker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingCapability {}

/// Prompts capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptsCapability {
    #[serde(default, rename = "listChanged")]
    pub list_changed: bool,
}

/// Resources capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcesCapability {
    #[serde(default)]
    pub subscribe: bool,

    #[serde(default, rename = "listChanged")]
    pub list_changed: bool,
}

/// Tools capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolsCapability {
    #[serde(default, rename = "listChanged")]
    pub list_changed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_advertisement() {
        let caps = ServerCapabilities::default();
        assert!(caps.tools.unwrap().list_changed);
        let resources = caps.resources.unwrap();
        assert!(resources.subscribe);
        assert!(resources.list_changed);
        assert!(caps.prompts.unwrap().list_changed);
        assert_eq!(caps.experimental.get("streaming"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_override_wins() {
        let overrides = CapabilityOverrides {
            resources_subscribe: Some(false),
            ..Default::default()
        };
        let caps = ServerCapabilities::default().with_overrides(&overrides);
        assert!(!caps.resources.unwrap().subscribe);
        // Untouched defaults survive
        assert!(caps.tools.unwrap().list_changed);
    }

    #[test]
    fn test_wire_field_names() {
        let caps = ServerCapabilities::default();
        let value = serde_json::to_value(&caps).unwrap();
        assert_eq!(value["tools"]["listChanged"], true);
        assert_eq!(value["resources"]["subscribe"], true);
    }
}
