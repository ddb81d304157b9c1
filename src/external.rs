//! Externally-owned identities.
//!
//! Long-lived objects owned by an outside registry (shared assets, config
//! singletons) are referenced by a fixed, well-known path and never walked
//! into. The same table serves save (object → path) and load (path → object).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::types::{ObjectId, ObjectRef, StructuralPath};

/// Root segment used by [`ExternalIdentities::register_asset`].
pub const ASSET_ROOT: &str = "@assets";

/// Bidirectional table of externally-owned identities.
#[derive(Clone, Default)]
pub struct ExternalIdentities {
    by_path: BTreeMap<StructuralPath, ObjectRef>,
    by_id: HashMap<ObjectId, StructuralPath>,
}

impl ExternalIdentities {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `object` at `path`, replacing any previous entry for either.
    pub fn register(&mut self, path: StructuralPath, object: &ObjectRef) {
        let id = ObjectId::of(object);
        if let Some(old_path) = self.by_id.remove(&id) {
            self.by_path.remove(&old_path);
        }
        if let Some(old) = self.by_path.insert(path.clone(), Arc::clone(object)) {
            self.by_id.remove(&ObjectId::of(&old));
        }
        self.by_id.insert(id, path);
    }

    /// Register a named asset at `[@assets, name]`.
    pub fn register_asset(&mut self, name: impl Into<String>, object: &ObjectRef) -> StructuralPath {
        let path = StructuralPath::root(ASSET_ROOT).child(name);
        self.register(path.clone(), object);
        path
    }

    /// Remove the entry at `path`.
    pub fn unregister(&mut self, path: &StructuralPath) -> Option<ObjectRef> {
        let object = self.by_path.remove(path)?;
        self.by_id.remove(&ObjectId::of(&object));
        Some(object)
    }

    /// Well-known path of `object`, if registered.
    pub fn path_of(&self, object: &ObjectRef) -> Option<&StructuralPath> {
        self.by_id.get(&ObjectId::of(object))
    }

    /// Object registered at `path`.
    pub fn get(&self, path: &StructuralPath) -> Option<&ObjectRef> {
        self.by_path.get(path)
    }

    /// All entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&StructuralPath, &ObjectRef)> {
        self.by_path.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

impl std::fmt::Debug for ExternalIdentities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.by_path.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{object, Persistable};
    use std::any::Any;

    struct Asset;

    impl Persistable for Asset {
        fn type_name(&self) -> &'static str {
            "Asset"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn test_bidirectional_lookup() {
        let sword = object(Asset);
        let mut table = ExternalIdentities::new();
        let path = table.register_asset("sword", &sword);

        assert_eq!(path.segments(), &[ASSET_ROOT.to_string(), "sword".to_string()]);
        assert_eq!(table.path_of(&sword), Some(&path));
        assert!(table.get(&path).is_some());
    }

    #[test]
    fn test_reregistration_replaces_both_sides() {
        let a = object(Asset);
        let b = object(Asset);
        let mut table = ExternalIdentities::new();
        let path = table.register_asset("slot", &a);
        table.register(path.clone(), &b);

        assert!(table.path_of(&a).is_none());
        assert_eq!(table.path_of(&b), Some(&path));
        assert_eq!(table.len(), 1);

        assert!(table.unregister(&path).is_some());
        assert!(table.is_empty());
    }
}
