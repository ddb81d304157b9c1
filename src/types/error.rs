//! Structural diagnostics.
//!
//! Structural errors are local: the offending node or member is skipped and
//! the walk, build or load carries on. They are collected into
//! [`Diagnostics`] and returned with the operation result.

use serde::Serialize;
use tracing::warn;

use super::path::StructuralPath;

/// A non-fatal problem with one node or member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuralError {
    /// A member points at an object that is tracked nowhere.
    #[error("unresolved reference at {path}.{member}")]
    UnresolvedMember {
        /// Owning node.
        path: StructuralPath,
        /// Member name.
        member: String,
    },
    /// A stored reference names a path that resolved to nothing on load.
    #[error("dangling reference at {path}.{member} -> {target}")]
    DanglingReference {
        /// Owning node.
        path: StructuralPath,
        /// Member name.
        member: String,
        /// Missing target.
        target: StructuralPath,
    },
    /// Nothing can persist this type.
    #[error("unsupported type {type_name} at {path}")]
    UnsupportedType {
        /// Node path.
        path: StructuralPath,
        /// Declared type.
        type_name: String,
    },
    /// The type name stored in a node is not registered for construction.
    #[error("unknown type {type_name} at {path}")]
    UnknownType {
        /// Node path.
        path: StructuralPath,
        /// Stored type name.
        type_name: String,
    },
    /// A member name was written to more than one partition.
    #[error("duplicate member {path}.{member}")]
    DuplicateMember {
        /// Owning node.
        path: StructuralPath,
        /// Member name.
        member: String,
    },
    /// A root name was reused for a different object in the same group.
    #[error("duplicate root {path}")]
    DuplicateRoot {
        /// Path both roots would occupy.
        path: StructuralPath,
    },
    /// A member value could not be captured as data.
    #[error("member {path}.{member} not capturable: {reason}")]
    UncapturableMember {
        /// Owning node.
        path: StructuralPath,
        /// Member name.
        member: String,
        /// Serializer message.
        reason: String,
    },
    /// A host-managed node has no live counterpart.
    #[error("no host object at {path}")]
    HostObjectMissing {
        /// Node path.
        path: StructuralPath,
    },
    /// The object refused a value or reference.
    #[error("member {path}.{member} rejected: {reason}")]
    MemberRejected {
        /// Owning node.
        path: StructuralPath,
        /// Member name.
        member: String,
        /// Reason given by the object.
        reason: String,
    },
    /// No registered converter claims a converter node's type.
    #[error("no converter for {type_name} at {path}")]
    MissingConverter {
        /// Node path.
        path: StructuralPath,
        /// Declared type.
        type_name: String,
    },
    /// A save/load hook or converter failed.
    #[error("custom persistence failed at {path}: {message}")]
    Custom {
        /// Node path.
        path: StructuralPath,
        /// Failure message.
        message: String,
    },
}

/// Collected structural errors of one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    errors: Vec<StructuralError>,
}

impl Diagnostics {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record and log an error.
    pub fn report(&mut self, error: StructuralError) {
        warn!(error = %error, "structural error");
        self.errors.push(error);
    }

    /// Append every error from `other`.
    pub fn extend(&mut self, other: Diagnostics) {
        self.errors.extend(other.errors);
    }

    /// All recorded errors in report order.
    pub fn errors(&self) -> &[StructuralError] {
        &self.errors
    }

    /// Number of recorded errors.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Whether nothing was reported.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}
