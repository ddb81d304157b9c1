//! Handlers passed to custom hooks and converters.
//!
//! A [`SaveHandler`] writes into the node being built; references are
//! resolved against the same two-level identity lookup the builder uses.
//! A [`LoadHandler`] reads from a stored node and queues reference wiring
//! as [`PendingReference`]s, which only run once every node of the unit
//! exists.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use crate::registry::ConvertError;
use crate::types::{ObjectId, ObjectRef, PersistedNode, StructuralError, StructuralPath};

/// Identity-keyed lookups produced by discovery.
///
/// Resolution checks the objects stored by this walk first, then the
/// externally-owned identities.
#[derive(Debug, Clone, Default)]
pub struct IdentityLookup {
    nodes: HashMap<ObjectId, StructuralPath>,
    plain: HashSet<ObjectId>,
    external: HashMap<ObjectId, StructuralPath>,
}

impl IdentityLookup {
    /// Create an empty lookup.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an object stored as its own node.
    pub fn insert_node(&mut self, id: ObjectId, path: StructuralPath) {
        self.nodes.insert(id, path);
    }

    /// Record an object embedded as a plain value.
    pub fn insert_plain(&mut self, id: ObjectId) {
        self.plain.insert(id);
    }

    /// Record an externally-owned identity encountered by the walk.
    pub fn insert_external(&mut self, id: ObjectId, path: StructuralPath) {
        self.external.insert(id, path);
    }

    /// Path of a stored node or external identity.
    pub fn resolve(&self, object: &ObjectRef) -> Option<&StructuralPath> {
        let id = ObjectId::of(object);
        self.nodes.get(&id).or_else(|| self.external.get(&id))
    }

    /// Whether `object` is embedded by value.
    pub fn is_plain(&self, object: &ObjectRef) -> bool {
        self.plain.contains(&ObjectId::of(object))
    }

    /// Path of an external identity hit during the walk.
    pub fn external(&self, object: &ObjectRef) -> Option<&StructuralPath> {
        self.external.get(&ObjectId::of(object))
    }

    /// Number of stored-node entries.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of external identities hit.
    pub fn external_count(&self) -> usize {
        self.external.len()
    }
}

/// Write access to the node of an object being saved by custom code.
pub struct SaveHandler<'a> {
    path: &'a StructuralPath,
    node: &'a mut PersistedNode,
    lookup: &'a IdentityLookup,
}

impl<'a> SaveHandler<'a> {
    /// Create a handler writing into `node`.
    pub fn new(path: &'a StructuralPath, node: &'a mut PersistedNode, lookup: &'a IdentityLookup) -> Self {
        Self { path, node, lookup }
    }

    /// Path of the node being written.
    pub fn path(&self) -> &StructuralPath {
        self.path
    }

    /// Write an inline value.
    pub fn write_value(&mut self, name: &str, value: serde_json::Value) -> Result<(), StructuralError> {
        if self.node.insert_private(name, value) {
            Ok(())
        } else {
            Err(self.duplicate(name))
        }
    }

    /// Serialize and write an inline value.
    pub fn write<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> Result<(), ConvertError> {
        let value = serde_json::to_value(value).map_err(|e| ConvertError::Decode {
            member: name.to_string(),
            message: e.to_string(),
        })?;
        self.write_value(name, value)?;
        Ok(())
    }

    /// Write a reference to another tracked object.
    pub fn write_reference(&mut self, name: &str, target: &ObjectRef) -> Result<(), StructuralError> {
        let resolved = self.lookup.resolve(target).cloned().ok_or_else(|| {
            StructuralError::UnresolvedMember {
                path: self.path.clone(),
                member: name.to_string(),
            }
        })?;
        if self.node.insert_reference(name, resolved) {
            Ok(())
        } else {
            Err(self.duplicate(name))
        }
    }

    fn duplicate(&self, name: &str) -> StructuralError {
        StructuralError::DuplicateMember {
            path: self.path.clone(),
            member: name.to_string(),
        }
    }
}

type ApplyCallback = Box<dyn FnOnce(ObjectRef) -> Result<(), String> + Send>;

enum Apply {
    Member(ObjectRef),
    Callback(ApplyCallback),
}

/// A reference that is wired after every node of the unit exists.
pub struct PendingReference {
    /// Node that requested the reference.
    pub source: StructuralPath,
    /// Member being wired.
    pub member: String,
    /// Path of the referenced node.
    pub target: StructuralPath,
    apply: Apply,
}

impl PendingReference {
    /// Wire `owner.member` through [`Persistable::apply_reference`](crate::types::Persistable::apply_reference).
    pub fn member(source: StructuralPath, member: impl Into<String>, target: StructuralPath, owner: ObjectRef) -> Self {
        Self {
            source,
            member: member.into(),
            target,
            apply: Apply::Member(owner),
        }
    }

    /// Hand the resolved target to a callback.
    pub fn callback<F>(source: StructuralPath, member: impl Into<String>, target: StructuralPath, callback: F) -> Self
    where
        F: FnOnce(ObjectRef) -> Result<(), String> + Send + 'static,
    {
        Self {
            source,
            member: member.into(),
            target,
            apply: Apply::Callback(Box::new(callback)),
        }
    }

    /// Apply with the resolved target instance.
    pub fn apply(self, target: ObjectRef) -> Result<(), String> {
        match self.apply {
            Apply::Member(owner) => owner.write().apply_reference(&self.member, target),
            Apply::Callback(callback) => callback(target),
        }
    }
}

impl fmt::Debug for PendingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReference")
            .field("source", &self.source)
            .field("member", &self.member)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Read access to a stored node during Phase 1 of a load.
pub struct LoadHandler<'a> {
    path: &'a StructuralPath,
    node: &'a PersistedNode,
    owner: Option<ObjectRef>,
    pending: &'a mut VecDeque<PendingReference>,
}

impl<'a> LoadHandler<'a> {
    /// Create a handler for `node`. `owner` is the instance being restored,
    /// or `None` when a converter has yet to create it.
    pub fn new(
        path: &'a StructuralPath,
        node: &'a PersistedNode,
        owner: Option<ObjectRef>,
        pending: &'a mut VecDeque<PendingReference>,
    ) -> Self {
        Self { path, node, owner, pending }
    }

    /// Path of the node being read.
    pub fn path(&self) -> &StructuralPath {
        self.path
    }

    /// Declared type of the node.
    pub fn type_name(&self) -> &str {
        &self.node.type_name
    }

    /// Set the instance that [`request_reference`](Self::request_reference) wires into.
    pub fn set_owner(&mut self, owner: ObjectRef) {
        self.owner = Some(owner);
    }

    /// Raw stored value: private data first, then inline values.
    pub fn value(&self, name: &str) -> Option<&serde_json::Value> {
        self.node.private.get(name).or_else(|| self.node.values.get(name))
    }

    /// Decode a stored value.
    pub fn read<T: DeserializeOwned>(&self, name: &str) -> Result<T, ConvertError> {
        let value = self
            .value(name)
            .ok_or_else(|| ConvertError::MissingMember(name.to_string()))?;
        serde_json::from_value(value.clone()).map_err(|e| ConvertError::Decode {
            member: name.to_string(),
            message: e.to_string(),
        })
    }

    /// Decode a stored value, `None` if absent.
    pub fn read_optional<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, ConvertError> {
        match self.value(name) {
            None => Ok(None),
            Some(_) => self.read(name).map(Some),
        }
    }

    /// Stored target path of reference member `name`.
    pub fn reference_path(&self, name: &str) -> Option<&StructuralPath> {
        self.node.references.get(name)
    }

    /// Queue wiring of reference `name` into the owner via `apply_reference`.
    ///
    /// Returns `false` if no such reference was stored or no owner is set.
    pub fn request_reference(&mut self, name: &str) -> bool {
        let (Some(target), Some(owner)) = (self.node.references.get(name), self.owner.clone()) else {
            return false;
        };
        self.pending.push_back(PendingReference::member(self.path.clone(), name, target.clone(), owner));
        true
    }

    /// Queue `callback` to receive the target of reference `name`.
    ///
    /// Returns `false` if no such reference was stored.
    pub fn defer_reference<F>(&mut self, name: &str, callback: F) -> bool
    where
        F: FnOnce(ObjectRef) -> Result<(), String> + Send + 'static,
    {
        let Some(target) = self.node.references.get(name) else {
            return false;
        };
        self.pending
            .push_back(PendingReference::callback(self.path.clone(), name, target.clone(), callback));
        true
    }
}
