//! Persisted graph buffers.
//!
//! A [`PersistedNode`] is the durable form of one discovered object. Nodes of
//! one root set form a [`GraphSnapshot`]; snapshots of every structural group
//! form the [`PersistenceUnit`] that the pipeline writes.
//!
//! ## Determinism Guarantees
//!
//! All maps are `BTreeMap`s so that encoding an unchanged graph yields
//! byte-identical output.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::canonical::canonical_hash_hex;
use super::path::StructuralPath;

/// Classification governing how a node is buffered and reconstructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyTag {
    /// Nothing could persist the object.
    #[default]
    Unsupported,
    /// Identity owned by the host collaborator; resolved, not constructed.
    HostManagedObject,
    /// Has capturable members.
    AutomaticComposite,
    /// No members, persisted through its own save/load hooks.
    CustomHookObject,
    /// No members or hooks, persisted by a registered converter.
    CustomConverter,
    /// Opaque value delegated to the data format.
    PlainValue,
}

impl StrategyTag {
    /// Whether nodes with this tag are stored as their own buffer.
    ///
    /// Plain values are embedded into their referrer instead.
    pub fn is_stored(&self) -> bool {
        !matches!(self, Self::Unsupported | Self::PlainValue)
    }
}

impl fmt::Display for StrategyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported => write!(f, "unsupported"),
            Self::HostManagedObject => write!(f, "host_managed_object"),
            Self::AutomaticComposite => write!(f, "automatic_composite"),
            Self::CustomHookObject => write!(f, "custom_hook_object"),
            Self::CustomConverter => write!(f, "custom_converter"),
            Self::PlainValue => write!(f, "plain_value"),
        }
    }
}

/// Which partition of a node a member name lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberSlot {
    /// Inline value map.
    Value,
    /// Reference map.
    Reference,
    /// Converter/hook private map.
    Private,
}

/// Durable, serializable form of one discovered object.
///
/// A member name appears in at most one of `values`, `references` and
/// `private`; the insert methods refuse duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedNode {
    /// How the node is reconstructed.
    pub strategy: StrategyTag,
    /// Declared type identity.
    pub type_name: String,
    /// Inline member values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, serde_json::Value>,
    /// Members that point at other nodes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub references: BTreeMap<String, StructuralPath>,
    /// Data written by save hooks or converters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub private: BTreeMap<String, serde_json::Value>,
}

impl PersistedNode {
    /// Create an empty node.
    pub fn new(strategy: StrategyTag, type_name: impl Into<String>) -> Self {
        Self {
            strategy,
            type_name: type_name.into(),
            values: BTreeMap::new(),
            references: BTreeMap::new(),
            private: BTreeMap::new(),
        }
    }

    /// Partition currently holding `name`, if any.
    pub fn slot_of(&self, name: &str) -> Option<MemberSlot> {
        if self.values.contains_key(name) {
            Some(MemberSlot::Value)
        } else if self.references.contains_key(name) {
            Some(MemberSlot::Reference)
        } else if self.private.contains_key(name) {
            Some(MemberSlot::Private)
        } else {
            None
        }
    }

    /// Insert an inline value. Returns `false` if the name is taken.
    pub fn insert_value(&mut self, name: impl Into<String>, value: serde_json::Value) -> bool {
        let name = name.into();
        if self.slot_of(&name).is_some() {
            return false;
        }
        self.values.insert(name, value);
        true
    }

    /// Insert a reference. Returns `false` if the name is taken.
    pub fn insert_reference(&mut self, name: impl Into<String>, target: StructuralPath) -> bool {
        let name = name.into();
        if self.slot_of(&name).is_some() {
            return false;
        }
        self.references.insert(name, target);
        true
    }

    /// Insert converter/hook private data. Returns `false` if the name is taken.
    pub fn insert_private(&mut self, name: impl Into<String>, value: serde_json::Value) -> bool {
        let name = name.into();
        if self.slot_of(&name).is_some() {
            return false;
        }
        self.private.insert(name, value);
        true
    }

    /// Total number of members across all partitions.
    pub fn member_count(&self) -> usize {
        self.values.len() + self.references.len() + self.private.len()
    }
}

/// Descriptor of a host-instantiated structural-group instance.
///
/// Used on load to reconcile the live set against the saved set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    /// Stable identity of the instance.
    pub instance_id: uuid::Uuid,
    /// Template (prefab) identity the host factory instantiates from.
    pub template_id: String,
    /// Structural group the instance lives in.
    pub group: String,
}

impl InstanceDescriptor {
    /// Create a descriptor.
    pub fn new(instance_id: uuid::Uuid, template_id: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            instance_id,
            template_id: template_id.into(),
            group: group.into(),
        }
    }

    /// Path segment the instance's objects are rooted at within its group.
    pub fn root_path(&self) -> StructuralPath {
        StructuralPath::root(self.group.clone()).child(self.instance_id.to_string())
    }
}

/// Buffers for one traversal root set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Structural group this snapshot was taken from.
    pub group: String,
    /// Root name → root node path.
    #[serde(default)]
    pub roots: BTreeMap<String, StructuralPath>,
    /// Path → node.
    #[serde(default)]
    pub nodes: BTreeMap<StructuralPath, PersistedNode>,
    /// Host-instantiated instances live at save time.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instances: Vec<InstanceDescriptor>,
}

impl GraphSnapshot {
    /// Create an empty snapshot for `group`.
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            ..Self::default()
        }
    }

    /// Number of stored nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the snapshot stores no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node at `path`.
    pub fn node(&self, path: &StructuralPath) -> Option<&PersistedNode> {
        self.nodes.get(path)
    }

    /// Deterministic fingerprint of the snapshot contents.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        canonical_hash_hex(self)
    }
}

/// Full save payload: one snapshot per structural group.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PersistenceUnit {
    /// Group identity → snapshot.
    pub groups: BTreeMap<String, GraphSnapshot>,
}

impl PersistenceUnit {
    /// Create an empty unit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the snapshot for its group.
    pub fn insert(&mut self, snapshot: GraphSnapshot) {
        self.groups.insert(snapshot.group.clone(), snapshot);
    }

    /// Snapshot for `group`.
    pub fn group(&self, group: &str) -> Option<&GraphSnapshot> {
        self.groups.get(group)
    }

    /// Total nodes across every group.
    pub fn node_count(&self) -> usize {
        self.groups.values().map(GraphSnapshot::len).sum()
    }

    /// Deterministic fingerprint of the whole unit.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        canonical_hash_hex(self)
    }
}
