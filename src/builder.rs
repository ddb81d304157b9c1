//! Buffer builder.
//!
//! Converts a [`Discovery`] into a [`GraphSnapshot`]. Every member of a
//! stored element lands in exactly one partition of its node:
//!
//! - plain data and plain-value objects → inline values
//! - objects tracked by the walk or the external table → references
//! - data written by save hooks and converters → private data
//!
//! A member whose object is tracked nowhere is reported and skipped; the
//! rest of the node is still built.

use tracing::debug;

use crate::handler::{IdentityLookup, SaveHandler};
use crate::registry::ConverterRegistry;
use crate::types::{
    Diagnostics, GraphSnapshot, InstanceDescriptor, MemberValue, PersistedNode, StrategyTag,
    StructuralError, StructuralPath,
};
use crate::walker::{DiscoveredElement, Discovery};

/// Name of the inline value holding a plain-value root.
pub const PLAIN_ROOT_MEMBER: &str = "value";

/// Turns discovered elements into persisted nodes.
pub struct BufferBuilder<'a> {
    converters: &'a ConverterRegistry,
}

impl<'a> BufferBuilder<'a> {
    /// Create a builder dispatching converter nodes through `converters`.
    pub fn new(converters: &'a ConverterRegistry) -> Self {
        Self { converters }
    }

    /// Build the snapshot for one discovery pass.
    ///
    /// `instances` are the host instances live in the group at save time.
    pub fn build(&self, discovery: &Discovery, instances: Vec<InstanceDescriptor>) -> (GraphSnapshot, Diagnostics) {
        let mut snapshot = GraphSnapshot::new(discovery.group.clone());
        let mut diagnostics = Diagnostics::new();

        for element in &discovery.elements {
            let is_root = discovery.roots.iter().any(|(_, p)| p == &element.path);
            if let Some(node) = self.build_node(element, is_root, &discovery.lookup, &mut diagnostics) {
                snapshot.nodes.insert(element.path.clone(), node);
            }
        }

        for (name, path) in &discovery.roots {
            snapshot.roots.insert(name.clone(), path.clone());
        }
        snapshot.instances = instances;

        debug!(
            group = %snapshot.group,
            nodes = snapshot.len(),
            skipped = discovery.elements.len() - snapshot.len(),
            errors = diagnostics.len(),
            "snapshot built"
        );
        (snapshot, diagnostics)
    }

    fn build_node(
        &self,
        element: &DiscoveredElement,
        is_root: bool,
        lookup: &IdentityLookup,
        diagnostics: &mut Diagnostics,
    ) -> Option<PersistedNode> {
        let mut node = PersistedNode::new(element.strategy, element.type_name);

        match element.strategy {
            StrategyTag::Unsupported => return None,
            StrategyTag::PlainValue => {
                // Plain values live inside their referrer; only a root has
                // nowhere else to go.
                if !is_root {
                    return None;
                }
                let value = element.object.read().to_plain()?;
                node.insert_value(PLAIN_ROOT_MEMBER, value);
            }
            StrategyTag::AutomaticComposite | StrategyTag::HostManagedObject => {
                partition_members(element, lookup, &mut node, diagnostics);
                let guard = element.object.read();
                if let Some(hooks) = guard.hooks() {
                    let mut handler = SaveHandler::new(&element.path, &mut node, lookup);
                    if let Err(e) = hooks.on_save(&mut handler) {
                        diagnostics.report(e.into_structural(&element.path));
                    }
                }
            }
            StrategyTag::CustomHookObject => {
                let guard = element.object.read();
                if let Some(hooks) = guard.hooks() {
                    let mut handler = SaveHandler::new(&element.path, &mut node, lookup);
                    if let Err(e) = hooks.on_save(&mut handler) {
                        diagnostics.report(e.into_structural(&element.path));
                    }
                }
            }
            StrategyTag::CustomConverter => {
                let Some(converter) = self.converters.find(element.type_name) else {
                    diagnostics.report(StructuralError::MissingConverter {
                        path: element.path.clone(),
                        type_name: element.type_name.to_string(),
                    });
                    return None;
                };
                let guard = element.object.read();
                let mut handler = SaveHandler::new(&element.path, &mut node, lookup);
                if let Err(e) = converter.save(&*guard, &mut handler) {
                    diagnostics.report(e.into_structural(&element.path));
                }
            }
        }

        Some(node)
    }
}

fn partition_members(
    element: &DiscoveredElement,
    lookup: &IdentityLookup,
    node: &mut PersistedNode,
    diagnostics: &mut Diagnostics,
) {
    for member in &element.members {
        let inserted = match &member.value {
            MemberValue::Value(value) => node.insert_value(member.name.clone(), value.clone()),
            MemberValue::Invalid(reason) => {
                diagnostics.report(StructuralError::UncapturableMember {
                    path: element.path.clone(),
                    member: member.name.clone(),
                    reason: reason.clone(),
                });
                continue;
            }
            MemberValue::Object(target) => {
                if lookup.is_plain(target) {
                    match target.read().to_plain() {
                        Some(value) => node.insert_value(member.name.clone(), value),
                        None => {
                            report_unresolved(diagnostics, &element.path, &member.name);
                            continue;
                        }
                    }
                } else if let Some(path) = lookup.resolve(target) {
                    node.insert_reference(member.name.clone(), path.clone())
                } else {
                    report_unresolved(diagnostics, &element.path, &member.name);
                    continue;
                }
            }
        };

        if !inserted {
            diagnostics.report(StructuralError::DuplicateMember {
                path: element.path.clone(),
                member: member.name.clone(),
            });
        }
    }
}

fn report_unresolved(diagnostics: &mut Diagnostics, path: &StructuralPath, member: &str) {
    diagnostics.report(StructuralError::UnresolvedMember {
        path: path.clone(),
        member: member.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::ExternalIdentities;
    use crate::handler::LoadHandler;
    use crate::registry::ConvertError;
    use crate::types::{object, Member, ObjectRef, Persistable};
    use crate::walker::GraphWalker;
    use serde_json::json;
    use std::any::Any;

    struct Holder {
        n: i64,
        target: Option<ObjectRef>,
    }

    impl Persistable for Holder {
        fn type_name(&self) -> &'static str {
            "Holder"
        }

        fn describe_members(&self) -> Vec<Member> {
            vec![
                Member::value("n", &self.n),
                Member::optional_object("target", self.target.as_ref()),
            ]
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    struct Color(u8, u8, u8);

    impl Persistable for Color {
        fn type_name(&self) -> &'static str {
            "Color"
        }

        fn to_plain(&self) -> Option<serde_json::Value> {
            Some(json!([self.0, self.1, self.2]))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    struct Mystery;

    impl Persistable for Mystery {
        fn type_name(&self) -> &'static str {
            "Mystery"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    struct Ledger {
        n: i64,
        by_key: std::collections::HashMap<Vec<u8>, u8>,
    }

    impl Persistable for Ledger {
        fn type_name(&self) -> &'static str {
            "Ledger"
        }

        fn describe_members(&self) -> Vec<Member> {
            vec![Member::value("n", &self.n), Member::value("by_key", &self.by_key)]
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn build(roots: &[(String, ObjectRef)], converters: &ConverterRegistry) -> (GraphSnapshot, Diagnostics) {
        let externals = ExternalIdentities::new();
        let discovery = GraphWalker::new(converters, &externals).discover("g", roots);
        let (snapshot, diagnostics) = BufferBuilder::new(converters).build(&discovery, Vec::new());
        let mut all = discovery.diagnostics.clone();
        all.extend(diagnostics);
        (snapshot, all)
    }

    #[test]
    fn test_plain_values_are_inlined() {
        let holder = object(Holder {
            n: 4,
            target: Some(object(Color(1, 2, 3))),
        });
        let (snapshot, diagnostics) = build(&[("h".to_string(), holder)], &ConverterRegistry::new());

        assert!(diagnostics.is_empty());
        assert_eq!(snapshot.len(), 1);
        let node = snapshot.node(&StructuralPath::from_segments(["g", "h"])).unwrap();
        assert_eq!(node.values.get("target"), Some(&json!([1, 2, 3])));
        assert_eq!(node.values.get("n"), Some(&json!(4)));
        assert!(node.references.is_empty());
    }

    #[test]
    fn test_references_and_partition_invariant() {
        let inner = object(Holder { n: 1, target: None });
        let outer = object(Holder {
            n: 2,
            target: Some(inner.clone()),
        });
        let (snapshot, _) = build(&[("outer".to_string(), outer)], &ConverterRegistry::new());

        let node = snapshot.node(&StructuralPath::from_segments(["g", "outer"])).unwrap();
        assert_eq!(
            node.references.get("target"),
            Some(&StructuralPath::from_segments(["g", "outer", "target"]))
        );
        for node in snapshot.nodes.values() {
            for name in node.values.keys() {
                assert!(!node.references.contains_key(name));
                assert!(!node.private.contains_key(name));
            }
            for name in node.references.keys() {
                assert!(!node.private.contains_key(name));
            }
        }
    }

    #[test]
    fn test_unsupported_target_skips_member_only() {
        let holder = object(Holder {
            n: 9,
            target: Some(object(Mystery)),
        });
        let (snapshot, diagnostics) = build(&[("h".to_string(), holder)], &ConverterRegistry::new());

        let node = snapshot.node(&StructuralPath::from_segments(["g", "h"])).unwrap();
        assert_eq!(node.values.get("n"), Some(&json!(9)));
        assert!(!node.references.contains_key("target"));
        assert!(diagnostics
            .errors()
            .iter()
            .any(|e| matches!(e, StructuralError::UnresolvedMember { member, .. } if member == "target")));
        assert!(diagnostics
            .errors()
            .iter()
            .any(|e| matches!(e, StructuralError::UnsupportedType { .. })));
    }

    #[test]
    fn test_plain_root_is_stored() {
        let (snapshot, _) = build(&[("c".to_string(), object(Color(9, 8, 7)))], &ConverterRegistry::new());
        let node = snapshot.node(&StructuralPath::from_segments(["g", "c"])).unwrap();
        assert_eq!(node.strategy, StrategyTag::PlainValue);
        assert_eq!(node.values.get(PLAIN_ROOT_MEMBER), Some(&json!([9, 8, 7])));
    }

    #[test]
    fn test_converter_writes_private_data() {
        let mut converters = ConverterRegistry::new();
        converters.register_fn(
            |t| t == "Mystery",
            |_, handler| handler.write("secret", &42),
            |_: &mut LoadHandler<'_>| Err(ConvertError::Other("unused".to_string())),
        );
        let (snapshot, diagnostics) = build(&[("m".to_string(), object(Mystery))], &converters);

        assert!(diagnostics.is_empty());
        let node = snapshot.node(&StructuralPath::from_segments(["g", "m"])).unwrap();
        assert_eq!(node.strategy, StrategyTag::CustomConverter);
        assert_eq!(node.private.get("secret"), Some(&json!(42)));
    }

    #[test]
    fn test_unserializable_member_is_reported_and_skipped() {
        let mut by_key = std::collections::HashMap::new();
        by_key.insert(vec![1u8], 1u8);
        let ledger = object(Ledger { n: 5, by_key });
        let (snapshot, diagnostics) = build(&[("l".to_string(), ledger)], &ConverterRegistry::new());

        let node = snapshot.node(&StructuralPath::from_segments(["g", "l"])).unwrap();
        assert_eq!(node.values.get("n"), Some(&json!(5)));
        assert!(!node.values.contains_key("by_key"));
        assert!(diagnostics
            .errors()
            .iter()
            .any(|e| matches!(e, StructuralError::UncapturableMember { member, .. } if member == "by_key")));
    }

    #[test]
    fn test_duplicate_root_name_keeps_first_and_reports() {
        let first = object(Holder { n: 1, target: None });
        let second = object(Holder { n: 2, target: None });
        let roots = vec![
            ("x".to_string(), first),
            ("x".to_string(), second.clone()),
            ("x".to_string(), second),
        ];
        let (snapshot, diagnostics) = build(&roots, &ConverterRegistry::new());

        assert_eq!(snapshot.len(), 1);
        let node = snapshot.node(&StructuralPath::from_segments(["g", "x"])).unwrap();
        assert_eq!(node.values.get("n"), Some(&json!(1)));
        let duplicates = diagnostics
            .errors()
            .iter()
            .filter(|e| matches!(e, StructuralError::DuplicateRoot { .. }))
            .count();
        assert_eq!(duplicates, 2);
    }
}
