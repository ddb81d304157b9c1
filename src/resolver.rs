//! Deferred reference resolver.
//!
//! Rebuilds a [`PersistenceUnit`] in two phases, expressed as a typestate:
//!
//! ```text
//! ReferenceResolver::instantiate → InstantiatedUnit::resolve → ResolvedGraph
//!        (Phase 1)                       (Phase 2)
//! ```
//!
//! **Phase 1** reconciles host instances, then walks every stored node in
//! order: constructs (or, for host-managed nodes, looks up) the instance,
//! applies inline values at once and queues every reference as a
//! [`PendingReference`].
//!
//! **Phase 2** runs once every path of the unit maps to a live instance and
//! drains the queue in enqueue order. Forward and cyclic references resolve
//! because nothing is wired before everything exists. A reference to a path
//! that resolved to nothing is reported and skipped.

use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, info, warn};

use crate::builder::PLAIN_ROOT_MEMBER;
use crate::external::ExternalIdentities;
use crate::handler::{LoadHandler, PendingReference};
use crate::host::{HostCollaborator, HostObjectTable, Reconciliation};
use crate::registry::{ConverterRegistry, TypeRegistry};
use crate::types::{
    Diagnostics, GraphSnapshot, ObjectRef, PersistedNode, PersistenceUnit, StrategyTag,
    StructuralError, StructuralPath,
};

/// Entry point of a load: holds the registries Phase 1 needs.
pub struct ReferenceResolver<'a> {
    types: &'a TypeRegistry,
    converters: &'a ConverterRegistry,
    externals: &'a ExternalIdentities,
    host: &'a dyn HostCollaborator,
}

/// State after Phase 1: every node has an instance, references are queued.
pub struct InstantiatedUnit {
    objects: HashMap<StructuralPath, ObjectRef>,
    pending: VecDeque<PendingReference>,
    roots: BTreeMap<String, BTreeMap<String, StructuralPath>>,
    diagnostics: Diagnostics,
}

/// Fully wired graph handed back to the caller.
pub struct ResolvedGraph {
    /// Every live instance of the unit by path, including external and
    /// host-owned identities.
    pub objects: HashMap<StructuralPath, ObjectRef>,
    /// Group → root name → reconstructed root.
    pub roots: BTreeMap<String, BTreeMap<String, ObjectRef>>,
    /// Structural errors from both phases.
    pub diagnostics: Diagnostics,
    /// Number of references wired in Phase 2.
    pub wired: usize,
}

impl ResolvedGraph {
    /// Reconstructed root `name` of `group`.
    pub fn root(&self, group: &str, name: &str) -> Option<&ObjectRef> {
        self.roots.get(group).and_then(|r| r.get(name))
    }

    /// Instance at `path`.
    pub fn object(&self, path: &StructuralPath) -> Option<&ObjectRef> {
        self.objects.get(path)
    }
}

impl std::fmt::Debug for ResolvedGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedGraph")
            .field("objects", &self.objects.len())
            .field("roots", &self.roots.values().map(BTreeMap::len).sum::<usize>())
            .field("diagnostics", &self.diagnostics)
            .field("wired", &self.wired)
            .finish()
    }
}

impl<'a> ReferenceResolver<'a> {
    /// Create a resolver.
    pub fn new(
        types: &'a TypeRegistry,
        converters: &'a ConverterRegistry,
        externals: &'a ExternalIdentities,
        host: &'a dyn HostCollaborator,
    ) -> Self {
        Self {
            types,
            converters,
            externals,
            host,
        }
    }

    /// Run both phases.
    pub fn load(&self, unit: &PersistenceUnit) -> ResolvedGraph {
        self.instantiate(unit).resolve()
    }

    /// Phase 1: instantiate every node of the unit.
    pub fn instantiate(&self, unit: &PersistenceUnit) -> InstantiatedUnit {
        let mut state = InstantiatedUnit {
            objects: HashMap::new(),
            pending: VecDeque::new(),
            roots: BTreeMap::new(),
            diagnostics: Diagnostics::new(),
        };

        for (path, object) in self.externals.iter() {
            state.objects.insert(path.clone(), object.clone());
        }

        for snapshot in unit.groups.values() {
            self.reconcile(snapshot, &mut state.diagnostics);
            let host_objects = self.host.host_objects(&snapshot.group);

            for (path, node) in &snapshot.nodes {
                self.instantiate_node(path, node, &host_objects, &mut state);
            }
            for (path, object) in host_objects {
                state.objects.entry(path).or_insert(object);
            }
            state.roots.insert(snapshot.group.clone(), snapshot.roots.clone());
        }

        debug!(
            objects = state.objects.len(),
            pending = state.pending.len(),
            "phase 1 complete"
        );
        state
    }

    fn reconcile(&self, snapshot: &GraphSnapshot, diagnostics: &mut Diagnostics) {
        let live = self.host.live_instances(&snapshot.group);
        let plan = Reconciliation::diff(&snapshot.instances, &live);
        if plan.is_noop() {
            return;
        }

        info!(
            group = %snapshot.group,
            instantiate = plan.to_instantiate.len(),
            dispose = plan.to_dispose.len(),
            "reconciling host instances"
        );
        for descriptor in &plan.to_instantiate {
            if let Err(e) = self.host.instantiate(descriptor) {
                diagnostics.report(StructuralError::Custom {
                    path: descriptor.root_path(),
                    message: e.to_string(),
                });
            }
        }
        for descriptor in &plan.to_dispose {
            if let Err(e) = self.host.dispose(descriptor) {
                diagnostics.report(StructuralError::Custom {
                    path: descriptor.root_path(),
                    message: e.to_string(),
                });
            }
        }
    }

    fn instantiate_node(
        &self,
        path: &StructuralPath,
        node: &PersistedNode,
        host_objects: &HostObjectTable,
        state: &mut InstantiatedUnit,
    ) {
        let object = match node.strategy {
            StrategyTag::Unsupported => return,
            StrategyTag::AutomaticComposite => {
                let Some(object) = self.construct(path, node, &mut state.diagnostics) else {
                    return;
                };
                apply_members(path, node, &object, state);
                run_load_hook(path, node, &object, state);
                object
            }
            StrategyTag::HostManagedObject => {
                let Some(object) = host_objects.get(path).cloned() else {
                    state
                        .diagnostics
                        .report(StructuralError::HostObjectMissing { path: path.clone() });
                    return;
                };
                apply_members(path, node, &object, state);
                run_load_hook(path, node, &object, state);
                object
            }
            StrategyTag::CustomHookObject => {
                let Some(object) = self.construct(path, node, &mut state.diagnostics) else {
                    return;
                };
                run_load_hook(path, node, &object, state);
                object
            }
            StrategyTag::CustomConverter => {
                let Some(converter) = self.converters.find(&node.type_name) else {
                    state.diagnostics.report(StructuralError::MissingConverter {
                        path: path.clone(),
                        type_name: node.type_name.clone(),
                    });
                    return;
                };
                let mut handler = LoadHandler::new(path, node, None, &mut state.pending);
                match converter.load(&mut handler) {
                    Ok(object) => object,
                    Err(e) => {
                        state.diagnostics.report(e.into_structural(path));
                        return;
                    }
                }
            }
            StrategyTag::PlainValue => {
                let Some(object) = self.construct(path, node, &mut state.diagnostics) else {
                    return;
                };
                let value = node
                    .values
                    .get(PLAIN_ROOT_MEMBER)
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                if let Err(reason) = object.write().apply_plain(value) {
                    state.diagnostics.report(StructuralError::MemberRejected {
                        path: path.clone(),
                        member: PLAIN_ROOT_MEMBER.to_string(),
                        reason,
                    });
                }
                object
            }
        };

        state.objects.insert(path.clone(), object);
    }

    fn construct(&self, path: &StructuralPath, node: &PersistedNode, diagnostics: &mut Diagnostics) -> Option<ObjectRef> {
        let object = self.types.construct(&node.type_name);
        if object.is_none() {
            diagnostics.report(StructuralError::UnknownType {
                path: path.clone(),
                type_name: node.type_name.clone(),
            });
        }
        object
    }
}

fn apply_members(path: &StructuralPath, node: &PersistedNode, object: &ObjectRef, state: &mut InstantiatedUnit) {
    {
        let mut guard = object.write();
        for (name, value) in &node.values {
            if let Err(reason) = guard.apply_value(name, value.clone()) {
                state.diagnostics.report(StructuralError::MemberRejected {
                    path: path.clone(),
                    member: name.clone(),
                    reason,
                });
            }
        }
    }
    for (name, target) in &node.references {
        state
            .pending
            .push_back(PendingReference::member(path.clone(), name.clone(), target.clone(), object.clone()));
    }
}

fn run_load_hook(path: &StructuralPath, node: &PersistedNode, object: &ObjectRef, state: &mut InstantiatedUnit) {
    let mut guard = object.write();
    let Some(hooks) = guard.hooks_mut() else {
        return;
    };
    let mut handler = LoadHandler::new(path, node, Some(object.clone()), &mut state.pending);
    if let Err(e) = hooks.on_load(&mut handler) {
        state.diagnostics.report(e.into_structural(path));
    }
}

impl InstantiatedUnit {
    /// Number of instances created or looked up so far.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Number of queued references.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Phase 2: wire every queued reference in enqueue order.
    pub fn resolve(mut self) -> ResolvedGraph {
        let mut wired = 0;
        while let Some(pending) = self.pending.pop_front() {
            let Some(target) = self.objects.get(&pending.target).cloned() else {
                self.diagnostics.report(StructuralError::DanglingReference {
                    path: pending.source.clone(),
                    member: pending.member.clone(),
                    target: pending.target.clone(),
                });
                continue;
            };
            let source = pending.source.clone();
            let member = pending.member.clone();
            match pending.apply(target) {
                Ok(()) => wired += 1,
                Err(reason) => self.diagnostics.report(StructuralError::MemberRejected {
                    path: source,
                    member,
                    reason,
                }),
            }
        }

        let mut roots = BTreeMap::new();
        for (group, group_roots) in &self.roots {
            let mut resolved = BTreeMap::new();
            for (name, path) in group_roots {
                match self.objects.get(path) {
                    Some(object) => {
                        resolved.insert(name.clone(), object.clone());
                    }
                    None => warn!(group = %group, root = %name, path = %path, "root was not reconstructed"),
                }
            }
            roots.insert(group.clone(), resolved);
        }

        debug!(wired, errors = self.diagnostics.len(), "phase 2 complete");
        ResolvedGraph {
            objects: self.objects,
            roots,
            diagnostics: self.diagnostics,
            wired,
        }
    }
}
