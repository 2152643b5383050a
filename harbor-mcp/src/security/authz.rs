//! Capability-based authorization

use std::collections::HashSet;

use crate::{McpError, McpResult};

/// Capability string required for an operation: `resource/action` maps to
/// `resource:action` (`tools/call` → `tools:call`). Operations without a
/// slash require themselves verbatim (`ping` → `ping`).
pub fn required_capability(operation: &str) -> String {
    operation.replacen('/', ":", 1)
}

/// Membership check honoring `*` and `resource:*` wildcards.
pub fn has_capability(capabilities: &HashSet<String>, required: &str) -> bool {
    if capabilities.contains("*") || capabilities.contains(required) {
        return true;
    }
    if let Some((resource, _action)) = required.split_once(':') {
        if capabilities.contains(&format!("{}:*", resource)) {
            return true;
        }
    }
    false
}

/// Authorizes operations against an identity's capability set
pub struct Authorizer;

impl Authorizer {
    /// Check an operation, plus the scheme capability when it touches a
    /// resource URI (`resources:workspace` for `workspace://...`).
    pub fn check(
        &self,
        capabilities: &HashSet<String>,
        operation: &str,
        resource_uri: Option<&str>,
    ) -> McpResult<()> {
        let required = required_capability(operation);
        if !has_capability(capabilities, &required) {
            return Err(McpError::authorization_denied(format!(
                "missing capability {}",
                required
            )));
        }

        if let Some(uri) = resource_uri {
            let scheme = uri.split_once("://").map(|(scheme, _)| scheme).ok_or_else(|| {
                McpError::resource_not_found(uri.to_string())
            })?;
            let scheme_cap = format!("resources:{}", scheme);
            if !has_capability(capabilities, &scheme_cap) {
                return Err(McpError::authorization_denied(format!(
                    "missing capability {}",
                    scheme_cap
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_operation_to_capability() {
        assert_eq!(required_capability("tools/call"), "tools:call");
        assert_eq!(required_capability("resources/read"), "resources:read");
        assert_eq!(required_capability("ping"), "ping");
        // Only the first slash separates resource from action
        assert_eq!(
            required_capability("workflows/execute"),
            "workflows:execute"
        );
    }

    #[test]
    fn test_exact_and_wildcard_membership() {
        assert!(has_capability(&caps(&["tools:call"]), "tools:call"));
        assert!(has_capability(&caps(&["tools:*"]), "tools:call"));
        assert!(has_capability(&caps(&["*"]), "anything:at_all"));
        assert!(!has_capability(&caps(&["tools:list"]), "tools:call"));
        assert!(!has_capability(&caps(&["resources:*"]), "tools:call"));
    }

    #[test]
    fn test_resource_scheme_requirement() {
        let authorizer = Authorizer;

        // Operation capability alone is not enough for a workspace URI
        let read_only = caps(&["resources:read"]);
        assert!(authorizer
            .check(&read_only, "resources/read", Some("workspace://doc/1"))
            .is_err());

        let with_scheme = caps(&["resources:read", "resources:workspace"]);
        assert!(authorizer
            .check(&with_scheme, "resources/read", Some("workspace://doc/1"))
            .is_ok());

        // resources:* covers both the action and the scheme
        let wildcard = caps(&["resources:*"]);
        assert!(authorizer
            .check(&wildcard, "resources/read", Some("memory://note/2"))
            .is_ok());
    }

    #[test]
    fn test_invalid_uri_is_not_found() {
        let authorizer = Authorizer;
        let err = authorizer
            .check(&caps(&["resources:*"]), "resources/read", Some("no-scheme"))
            .unwrap_err();
        assert!(matches!(err, McpError::ResourceNotFound { .. }));
    }

    #[test]
    fn test_denial_names_missing_capability() {
        let authorizer = Authorizer;
        let err = authorizer
            .check(&caps(&[]), "tools/call", None)
            .unwrap_err();
        assert!(err.to_string().contains("tools:call"));
    }
}
