//! Core types for the persistence kernel.

pub mod error;
pub mod metadata;
pub mod node;
pub mod object;
pub mod path;

pub use error::{Diagnostics, StructuralError};
pub use metadata::{FileMetadata, SemVer, SemVerParseError};
pub use node::{
    GraphSnapshot, InstanceDescriptor, MemberSlot, PersistedNode, PersistenceUnit, StrategyTag,
};
pub use object::{
    object, same_object, with_object, with_object_mut, CaptureMode, Member, MemberValue, ObjectId,
    ObjectRef, PersistHooks, Persistable,
};
pub use path::{PathParseError, StructuralPath, PATH_DELIMITER};
