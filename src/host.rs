//! Host collaborator contract.
//!
//! The host owns objects this crate never constructs or destroys itself
//! (scene components, spawned prefab instances). On save it reports which
//! structural-group instances are live; on load it instantiates or disposes
//! instances so the live set matches the saved set, then exposes its objects
//! through a path → instance table.

use std::collections::BTreeMap;

use crate::types::{InstanceDescriptor, ObjectRef, StructuralPath};

/// Path → live host object table for one structural group.
pub type HostObjectTable = BTreeMap<StructuralPath, ObjectRef>;

/// Failure reported by the host.
#[derive(Debug, Clone, thiserror::Error)]
#[error("host error: {0}")]
pub struct HostError(pub String);

/// Interface to the engine that owns host-managed objects.
pub trait HostCollaborator: Send + Sync {
    /// Instances currently live in `group`.
    fn live_instances(&self, group: &str) -> Vec<InstanceDescriptor>;

    /// Instantiate an instance from its template.
    fn instantiate(&self, descriptor: &InstanceDescriptor) -> Result<(), HostError>;

    /// Dispose a live instance absent from the snapshot.
    fn dispose(&self, descriptor: &InstanceDescriptor) -> Result<(), HostError>;

    /// Live host objects of `group`, addressed by path.
    fn host_objects(&self, group: &str) -> HostObjectTable;
}

/// Host with no managed objects, for pure object graphs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHost;

impl HostCollaborator for NullHost {
    fn live_instances(&self, _group: &str) -> Vec<InstanceDescriptor> {
        Vec::new()
    }

    fn instantiate(&self, descriptor: &InstanceDescriptor) -> Result<(), HostError> {
        Err(HostError(format!(
            "no host to instantiate template {}",
            descriptor.template_id
        )))
    }

    fn dispose(&self, _descriptor: &InstanceDescriptor) -> Result<(), HostError> {
        Ok(())
    }

    fn host_objects(&self, _group: &str) -> HostObjectTable {
        HostObjectTable::new()
    }
}

/// Outcome of reconciling saved instances against live ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Saved but not live: to instantiate.
    pub to_instantiate: Vec<InstanceDescriptor>,
    /// Live but not saved: to dispose.
    pub to_dispose: Vec<InstanceDescriptor>,
}

impl Reconciliation {
    /// Diff saved descriptors against live ones by instance id.
    pub fn diff(saved: &[InstanceDescriptor], live: &[InstanceDescriptor]) -> Self {
        let to_instantiate = saved
            .iter()
            .filter(|s| !live.iter().any(|l| l.instance_id == s.instance_id))
            .cloned()
            .collect();
        let to_dispose = live
            .iter()
            .filter(|l| !saved.iter().any(|s| s.instance_id == l.instance_id))
            .cloned()
            .collect();
        Self {
            to_instantiate,
            to_dispose,
        }
    }

    /// Whether the live set already matches.
    pub fn is_noop(&self) -> bool {
        self.to_instantiate.is_empty() && self.to_dispose.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn descriptor(id: u128) -> InstanceDescriptor {
        InstanceDescriptor::new(Uuid::from_u128(id), "crate", "level")
    }

    #[test]
    fn test_diff_instantiates_missing_and_disposes_extra() {
        let saved = vec![descriptor(1), descriptor(2)];
        let live = vec![descriptor(2), descriptor(3)];

        let plan = Reconciliation::diff(&saved, &live);
        assert_eq!(plan.to_instantiate, vec![descriptor(1)]);
        assert_eq!(plan.to_dispose, vec![descriptor(3)]);
        assert!(!plan.is_noop());
    }

    #[test]
    fn test_diff_noop_when_equal() {
        let set = vec![descriptor(1)];
        assert!(Reconciliation::diff(&set, &set).is_noop());
    }

    #[test]
    fn test_null_host_has_nothing() {
        let host = NullHost;
        assert!(host.live_instances("g").is_empty());
        assert!(host.host_objects("g").is_empty());
        assert!(host.instantiate(&descriptor(1)).is_err());
    }
}
