//! Registry of tools registered by duplex connections.

use dashmap::DashMap;
use std::collections::HashSet;

use codemode_core::{
    ConnectionId, ExternalToolDefinition, Result, ToolDefinition, ToolDescriptor, ToolGroup,
    ToolMeta, EXTERNAL_LOCAL_NAME,
};

/// Connection-scoped tool registry using DashMap.
///
/// Every connection gets its own namespace, so two connections can register
/// a tool with the same raw name without clashing. Re-registering from the
/// same connection appends; the reference index always points at the most
/// recent definition.
pub struct ExternalToolRegistry {
    /// Definitions per connection, in registration order.
    by_connection: DashMap<ConnectionId, Vec<ExternalToolDefinition>>,
    /// Reference name to definition.
    by_reference: DashMap<String, ExternalToolDefinition>,
}

impl ExternalToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            by_connection: DashMap::new(),
            by_reference: DashMap::new(),
        }
    }

    /// Register descriptors for a connection.
    ///
    /// Every guard is compiled before anything is stored, so one malformed
    /// schema fails the whole request and leaves the registry untouched.
    pub fn register(
        &self,
        connection_id: &ConnectionId,
        descriptors: Vec<ToolDescriptor>,
    ) -> Result<Vec<ExternalToolDefinition>> {
        let namespace = connection_id.namespace();

        let definitions = descriptors
            .into_iter()
            .map(|descriptor| {
                let meta = ToolMeta::build(
                    &namespace,
                    &descriptor.name,
                    descriptor.description,
                    descriptor.input_schema,
                    descriptor.output_schema,
                )?;
                Ok(ExternalToolDefinition {
                    meta,
                    connection_id: connection_id.clone(),
                    namespace: namespace.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        for definition in &definitions {
            tracing::debug!(
                connection_id = %connection_id,
                tool = %definition.meta.reference_name,
                "Registering external tool"
            );
            self.by_reference
                .insert(definition.meta.reference_name.clone(), definition.clone());
        }
        self.by_connection
            .entry(connection_id.clone())
            .or_default()
            .extend(definitions.iter().cloned());

        Ok(definitions)
    }

    /// Remove every tool a connection registered. Returns how many entries
    /// were dropped.
    pub fn unregister(&self, connection_id: &ConnectionId) -> usize {
        let Some((_, definitions)) = self.by_connection.remove(connection_id) else {
            return 0;
        };
        for definition in &definitions {
            self.by_reference
                .remove_if(&definition.meta.reference_name, |_, current| {
                    current.connection_id == *connection_id
                });
        }
        tracing::debug!(
            connection_id = %connection_id,
            count = definitions.len(),
            "Unregistered external tools"
        );
        definitions.len()
    }

    /// Look up a definition by reference name.
    pub fn get(&self, reference_name: &str) -> Option<ExternalToolDefinition> {
        self.by_reference
            .get(reference_name)
            .map(|entry| entry.value().clone())
    }

    /// Look up a definition, tagged for dispatch.
    pub fn lookup(&self, reference_name: &str) -> Option<ToolDefinition> {
        self.get(reference_name).map(ToolDefinition::External)
    }

    pub fn contains(&self, reference_name: &str) -> bool {
        self.by_reference.contains_key(reference_name)
    }

    /// All entries registered by a connection, duplicates included.
    pub fn tools_for(&self, connection_id: &ConnectionId) -> Vec<ExternalToolDefinition> {
        self.by_connection
            .get(connection_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Number of entries registered by a connection, duplicates included.
    pub fn count_for(&self, connection_id: &ConnectionId) -> usize {
        self.by_connection
            .get(connection_id)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    /// A connection's tools as seen from its sandbox: one entry per
    /// reference name, latest registration wins, first-seen order kept.
    pub fn group_for(&self, connection_id: &ConnectionId) -> ToolGroup {
        let definitions = self.tools_for(connection_id);
        let mut seen = HashSet::new();
        let mut tools: Vec<ToolMeta> = Vec::new();
        for definition in definitions {
            if seen.insert(definition.meta.reference_name.clone()) {
                tools.push(definition.meta);
            } else if let Some(slot) = tools
                .iter_mut()
                .find(|t| t.reference_name == definition.meta.reference_name)
            {
                *slot = definition.meta;
            }
        }
        ToolGroup::new(EXTERNAL_LOCAL_NAME, &connection_id.namespace(), tools)
    }

    /// Number of distinct reference names across all connections.
    pub fn len(&self) -> usize {
        self.by_reference.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_reference.is_empty()
    }
}

impl Default for ExternalToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codemode_core::Error;
    use serde_json::json;

    fn add_descriptor() -> ToolDescriptor {
        serde_json::from_value(json!({
            "name": "add",
            "description": "Add two numbers",
            "inputSchema": {
                "type": "object",
                "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                "required": ["a", "b"]
            },
            "outputSchema": {"type": "number"}
        }))
        .unwrap()
    }

    fn descriptor(name: &str) -> ToolDescriptor {
        serde_json::from_value(json!({ "name": name })).unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ExternalToolRegistry::new();
        let conn = ConnectionId::new();

        let registered = registry.register(&conn, vec![add_descriptor()]).unwrap();
        assert_eq!(registered.len(), 1);

        let reference = format!("{}.add", conn.namespace());
        assert_eq!(registered[0].meta.reference_name, reference);
        assert!(registry.contains(&reference));

        let def = registry.lookup(&reference).unwrap();
        assert_eq!(def.origin(), codemode_core::ToolOrigin::External);
        assert_eq!(def.meta().name, "add");
    }

    #[test]
    fn test_same_name_on_two_connections() {
        let registry = ExternalToolRegistry::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        registry.register(&a, vec![add_descriptor()]).unwrap();
        registry.register(&b, vec![add_descriptor()]).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.group_for(&a).tools.len(), 1);
        assert_ne!(
            registry.group_for(&a).tools[0].reference_name,
            registry.group_for(&b).tools[0].reference_name
        );
    }

    #[test]
    fn test_reregistration_appends() {
        let registry = ExternalToolRegistry::new();
        let conn = ConnectionId::new();

        registry.register(&conn, vec![add_descriptor()]).unwrap();
        registry.register(&conn, vec![add_descriptor()]).unwrap();

        assert_eq!(registry.count_for(&conn), 2);
        assert_eq!(registry.len(), 1);

        let group = registry.group_for(&conn);
        assert_eq!(group.name, "main");
        assert_eq!(group.tools.len(), 1);

        assert_eq!(registry.unregister(&conn), 2);
        assert_eq!(registry.count_for(&conn), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_malformed_schema_fails_whole_request() {
        let registry = ExternalToolRegistry::new();
        let conn = ConnectionId::new();

        let bad: ToolDescriptor = serde_json::from_value(json!({
            "name": "bad",
            "inputSchema": {"type": "object", "properties": {"x": {"type": 7}}}
        }))
        .unwrap();

        let result = registry.register(&conn, vec![descriptor("ok"), bad]);
        assert!(matches!(result, Err(Error::Schema(_))));
        assert_eq!(registry.count_for(&conn), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_leaves_other_connections() {
        let registry = ExternalToolRegistry::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        registry.register(&a, vec![descriptor("x"), descriptor("y")]).unwrap();
        registry.register(&b, vec![descriptor("x")]).unwrap();

        assert_eq!(registry.unregister(&a), 2);
        assert_eq!(registry.unregister(&a), 0);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&format!("{}.x", b.namespace())));
    }
}
