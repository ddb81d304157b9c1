//! # graph-persistence-kernel
//!
//! Identity-preserving persistence for cyclic object graphs.
//!
//! The kernel answers one question:
//!
//! > Given a set of live root objects, how do we write them out and get the
//! > **same graph shape** back, shared references and cycles included?
//!
//! ## Core Contract
//!
//! 1. Every reachable object gets a deterministic [`StructuralPath`]
//! 2. References are stored as paths, never as copies; plain data is inlined
//! 3. Load rebuilds every instance first and wires references second, so
//!    forward and cyclic references resolve
//! 4. Bytes go through encode → compress → encrypt, with a checksum and an
//!    exact version gate in a metadata file beside them
//!
//! ## Architecture
//!
//! ```text
//! save: roots → GraphWalker → BufferBuilder → PersistenceUnit → Pipeline → SaveStore
//! load: SaveStore → Pipeline → PersistenceUnit → ReferenceResolver → roots
//!                         ↑
//!            OperationSequencer (FIFO per save name)
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same graph + same roots → identical snapshot fingerprint
//! - Nodes are ordered by path, members by name
//! - Phase 1 of load walks nodes in stored order; Phase 2 wires in enqueue order

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod canonical;
pub mod config;
pub mod external;
pub mod handler;
pub mod host;
pub mod manager;
pub mod pipeline;
pub mod registry;
pub mod resolver;
pub mod sequencer;
pub mod store;
pub mod types;
pub mod walker;

// Re-exports
pub use types::{
    object, same_object, with_object, with_object_mut, CaptureMode, Diagnostics, FileMetadata,
    GraphSnapshot, InstanceDescriptor, Member, MemberValue, ObjectId, ObjectRef, PersistHooks,
    Persistable, PersistedNode, PersistenceUnit, SemVer, StrategyTag, StructuralError,
    StructuralPath,
};
pub use builder::BufferBuilder;
pub use canonical::{canonical_hash, canonical_hash_hex, to_canonical_bytes};
pub use config::{ChecksumConfig, CompressionConfig, ConfigError, EncryptionConfig, PersistenceConfig};
pub use external::ExternalIdentities;
pub use handler::{LoadHandler, SaveHandler};
pub use host::{HostCollaborator, HostError, HostObjectTable, NullHost};
pub use manager::{
    LoadedGraph, PersistError, PersistenceContext, PersistenceManager, SaveGroup, SaveReport, UserData,
};
pub use pipeline::{DataFormat, Pipeline, PipelineError, SealedPayload};
pub use registry::{ConvertError, Converter, ConverterRegistry, FnConverter, TypeRegistry};
pub use resolver::{InstantiatedUnit, ReferenceResolver, ResolvedGraph};
pub use sequencer::{OperationHandle, OperationSequencer, SequencerError, SequencerPool};
pub use store::{FileSaveStore, InMemorySaveStore, SaveStore, StoreError};
pub use walker::{DiscoveredElement, Discovery, GraphWalker};

/// Schema version of the persisted node layout.
/// Increment on breaking changes to any persisted type.
pub const PERSISTENCE_SCHEMA_VERSION: &str = "1.0.0";
