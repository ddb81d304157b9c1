//! Graph discovery walker.
//!
//! Expands a root set depth-first into an ordered, identity-deduplicated list
//! of [`DiscoveredElement`]s.
//!
//! ## Algorithm
//!
//! 1. Each root gets path `[group, root_name]`
//! 2. Before expanding an object, check the identity-keyed visited set; a
//!    revisit is a no-op (cycles and shared references stop here)
//! 3. Reserve the element's slot at the current write position, so parents
//!    always precede their children
//! 4. Capture the members allowed by the type's [`CaptureMode`] and recurse
//!    into object members, appending the member name to the path
//! 5. Externally-owned identities are recorded but never entered
//! 6. Once the subtree is expanded, classify the element
//!
//! ## Classification
//!
//! Fixed and exclusive precedence:
//! `HostManagedObject` > members → `AutomaticComposite` > hooks →
//! `CustomHookObject` > converter → `CustomConverter` > plain value →
//! `PlainValue`. Anything left is `Unsupported`, which is reported and later
//! skipped by the builder.

use std::collections::HashMap;
use tracing::{debug, trace};

use crate::external::ExternalIdentities;
use crate::handler::IdentityLookup;
use crate::registry::ConverterRegistry;
use crate::types::{
    CaptureMode, Diagnostics, Member, MemberValue, ObjectId, ObjectRef, StrategyTag,
    StructuralError, StructuralPath,
};

/// Transient traversal record for one object identity.
#[derive(Clone)]
pub struct DiscoveredElement {
    /// Classification.
    pub strategy: StrategyTag,
    /// Path assigned at first encounter.
    pub path: StructuralPath,
    /// The live object.
    pub object: ObjectRef,
    /// Declared type identity.
    pub type_name: &'static str,
    /// Members captured at discovery time.
    pub members: Vec<Member>,
}

impl DiscoveredElement {
    fn placeholder(path: StructuralPath, object: ObjectRef) -> Self {
        Self {
            strategy: StrategyTag::Unsupported,
            path,
            object,
            type_name: "",
            members: Vec::new(),
        }
    }
}

impl std::fmt::Debug for DiscoveredElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveredElement")
            .field("strategy", &self.strategy)
            .field("path", &self.path)
            .field("object", &ObjectId::of(&self.object))
            .field("type_name", &self.type_name)
            .field("members", &self.members)
            .finish()
    }
}

/// Output of one walk.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Structural group walked.
    pub group: String,
    /// Root name → resolved root path, in root order.
    pub roots: Vec<(String, StructuralPath)>,
    /// Elements in discovery order.
    pub elements: Vec<DiscoveredElement>,
    /// Identity lookups for the builder.
    pub lookup: IdentityLookup,
    /// Structural errors found while walking.
    pub diagnostics: Diagnostics,
}

impl Discovery {
    /// Element with the given path.
    pub fn element(&self, path: &StructuralPath) -> Option<&DiscoveredElement> {
        self.elements.iter().find(|e| &e.path == path)
    }

    /// All assigned paths in discovery order.
    pub fn paths(&self) -> Vec<&StructuralPath> {
        self.elements.iter().map(|e| &e.path).collect()
    }
}

/// Cycle-safe, reflective-free graph walker.
pub struct GraphWalker<'a> {
    converters: &'a ConverterRegistry,
    externals: &'a ExternalIdentities,
}

struct WalkState {
    visited: HashMap<ObjectId, StructuralPath>,
    discovery: Discovery,
}

impl<'a> GraphWalker<'a> {
    /// Create a walker consulting `converters` for classification and
    /// `externals` for objects it must not enter.
    pub fn new(converters: &'a ConverterRegistry, externals: &'a ExternalIdentities) -> Self {
        Self {
            converters,
            externals,
        }
    }

    /// Discover the graph reachable from `roots` within `group`.
    pub fn discover(&self, group: &str, roots: &[(String, ObjectRef)]) -> Discovery {
        let mut state = WalkState {
            visited: HashMap::new(),
            discovery: Discovery {
                group: group.to_string(),
                ..Discovery::default()
            },
        };

        let group_path = StructuralPath::root(group);
        let mut root_names: HashMap<&str, ObjectId> = HashMap::new();
        for (name, root) in roots {
            let id = ObjectId::of(root);
            match root_names.get(name.as_str()) {
                Some(seen) if *seen == id => continue,
                Some(_) => {
                    state.discovery.diagnostics.report(StructuralError::DuplicateRoot {
                        path: group_path.child(name.clone()),
                    });
                    continue;
                }
                None => {
                    root_names.insert(name.as_str(), id);
                }
            }

            self.visit(&mut state, root, group_path.child(name.clone()));

            let resolved = state
                .visited
                .get(&id)
                .cloned()
                .or_else(|| state.discovery.lookup.external(root).cloned());
            if let Some(path) = resolved {
                state.discovery.roots.push((name.clone(), path));
            }
        }

        debug!(
            group = %group,
            roots = roots.len(),
            elements = state.discovery.elements.len(),
            externals = state.discovery.lookup.external_count(),
            "graph discovery complete"
        );
        state.discovery
    }

    fn visit(&self, state: &mut WalkState, object: &ObjectRef, path: StructuralPath) {
        let id = ObjectId::of(object);
        if state.visited.contains_key(&id) {
            trace!(path = %path, "already discovered");
            return;
        }
        if let Some(external) = self.externals.path_of(object) {
            state.discovery.lookup.insert_external(id, external.clone());
            return;
        }

        let index = state.discovery.elements.len();
        state
            .discovery
            .elements
            .push(DiscoveredElement::placeholder(path.clone(), object.clone()));
        state.visited.insert(id, path.clone());

        // Capture under the read lock, then release it before recursing so
        // cyclic neighbours can be read.
        let (type_name, members, host_managed, has_hooks, is_plain) = {
            let guard = object.read();
            let mode = guard.capture_mode();
            let members: Vec<Member> = guard
                .describe_members()
                .into_iter()
                .filter(|m| mode == CaptureMode::AllMembers || m.tagged)
                .collect();
            (
                guard.type_name(),
                members,
                guard.is_host_managed(),
                guard.hooks().is_some(),
                guard.to_plain().is_some(),
            )
        };

        for member in &members {
            if let MemberValue::Object(child) = &member.value {
                if let Some(external) = self.externals.path_of(child) {
                    state
                        .discovery
                        .lookup
                        .insert_external(ObjectId::of(child), external.clone());
                    continue;
                }
                self.visit(state, child, path.child(member.name.clone()));
            }
        }

        let strategy = if host_managed {
            StrategyTag::HostManagedObject
        } else if !members.is_empty() {
            StrategyTag::AutomaticComposite
        } else if has_hooks {
            StrategyTag::CustomHookObject
        } else if self.converters.handles(type_name) {
            StrategyTag::CustomConverter
        } else if is_plain {
            StrategyTag::PlainValue
        } else {
            StrategyTag::Unsupported
        };

        match strategy {
            StrategyTag::Unsupported => state.discovery.diagnostics.report(StructuralError::UnsupportedType {
                path: path.clone(),
                type_name: type_name.to_string(),
            }),
            StrategyTag::PlainValue => state.discovery.lookup.insert_plain(id),
            _ => state.discovery.lookup.insert_node(id, path.clone()),
        }

        let element = &mut state.discovery.elements[index];
        element.strategy = strategy;
        element.type_name = type_name;
        element.members = members;
    }
}
