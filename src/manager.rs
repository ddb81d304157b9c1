//! Persistence manager.
//!
//! Ties discovery, building, the pipeline, the store and the sequencer into
//! whole operations against a named save. Each save is a pair of files:
//!
//! ```text
//! {name}.sav         sealed PersistenceUnit (encode → compress → encrypt)
//! {name}.meta.json   FileMetadata: version, timestamp, checksum, user data
//! ```
//!
//! ## Ordering
//!
//! Every operation on a name goes through that name's sequencer, so
//! operations run in call order and never overlap. The `submit_*` methods
//! queue synchronously and hand back an [`OperationHandle`]; the async
//! methods are the same calls followed by `wait`. A save captures the graph
//! when it is submitted, so `submit_save(A); submit_save(B)` leaves B on disk
//! even if the caller never awaits A.
//!
//! ## Write order
//!
//! 1. The data is written to `{name}.sav.staged`
//! 2. The metadata file is written; if that fails the staged file is
//!    removed and the previous pair stays loadable
//! 3. The staged file is renamed over `{name}.sav`
//!
//! A crash between 2 and 3 leaves new metadata beside the old data file,
//! which load reports as an integrity failure rather than reading stale or
//! half-written state.
//!
//! ## Load gates
//!
//! 1. Metadata is read first; a version unequal to the running version is
//!    rejected before the payload is read
//! 2. The payload checksum is verified before decryption
//! 3. Only then is the unit decoded and resolved

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::builder::BufferBuilder;
use crate::config::{ConfigError, PersistenceConfig};
use crate::external::ExternalIdentities;
use crate::host::{HostCollaborator, NullHost};
use crate::pipeline::{Pipeline, PipelineError};
use crate::registry::{ConverterRegistry, TypeRegistry};
use crate::resolver::ReferenceResolver;
use crate::sequencer::{OperationHandle, SequencerError, SequencerPool};
use crate::store::{SaveStore, StoreError};
use crate::types::{
    Diagnostics, FileMetadata, ObjectRef, PersistenceUnit, SemVer, StructuralPath,
};
use crate::walker::GraphWalker;

/// Suffix of the data file.
pub const DATA_FILE_SUFFIX: &str = ".sav";

/// Suffix of the data file while a save is in flight.
pub const STAGED_DATA_FILE_SUFFIX: &str = ".sav.staged";

/// Suffix of the metadata file.
pub const METADATA_FILE_SUFFIX: &str = ".meta.json";

/// User key/value bag stored in the metadata.
pub type UserData = BTreeMap<String, serde_json::Value>;

/// Operation-level failure. Structural problems never end up here; they
/// are collected in [`Diagnostics`].
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Stored bytes failed verification.
    #[error("integrity check failed for '{name}': {source}")]
    Integrity {
        /// Save name.
        name: String,
        /// Checksum failure.
        #[source]
        source: PipelineError,
    },

    /// Save was written by a different version.
    #[error("version mismatch for '{name}': running {expected}, file has {found}")]
    Version {
        /// Save name.
        name: String,
        /// Running version.
        expected: SemVer,
        /// Version in the metadata.
        found: SemVer,
    },

    /// Store failure.
    #[error(transparent)]
    Io(#[from] StoreError),

    /// Non-integrity pipeline failure.
    #[error("pipeline failed for '{name}': {source}")]
    Pipeline {
        /// Save name.
        name: String,
        /// Stage failure.
        #[source]
        source: PipelineError,
    },

    /// Metadata file is unreadable.
    #[error("metadata for '{name}' is malformed: {message}")]
    Metadata {
        /// Save name.
        name: String,
        /// Parser message.
        message: String,
    },

    /// Sequencer failure.
    #[error(transparent)]
    Sequencer(#[from] SequencerError),
}

impl PersistError {
    fn pipeline(name: &str, source: PipelineError) -> Self {
        if source.is_integrity() {
            Self::Integrity {
                name: name.to_string(),
                source,
            }
        } else {
            Self::Pipeline {
                name: name.to_string(),
                source,
            }
        }
    }

    fn metadata(name: &str, e: impl std::fmt::Display) -> Self {
        Self::Metadata {
            name: name.to_string(),
            message: e.to_string(),
        }
    }
}

/// Roots of one structural group to save.
#[derive(Clone, Default)]
pub struct SaveGroup {
    /// Group identity.
    pub group: String,
    /// Named roots.
    pub roots: Vec<(String, ObjectRef)>,
}

impl SaveGroup {
    /// Empty group.
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            roots: Vec::new(),
        }
    }

    /// Add a named root.
    pub fn with_root(mut self, name: impl Into<String>, root: &ObjectRef) -> Self {
        self.roots.push((name.into(), root.clone()));
        self
    }
}

impl std::fmt::Debug for SaveGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.roots.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("SaveGroup")
            .field("group", &self.group)
            .field("roots", &names)
            .finish()
    }
}

/// Outcome of a committed save.
#[derive(Debug, Clone)]
pub struct SaveReport {
    /// Metadata written.
    pub metadata: FileMetadata,
    /// Nodes stored across all groups.
    pub node_count: usize,
    /// Structural problems found while capturing.
    pub diagnostics: Diagnostics,
}

/// Reconstructed graph.
pub struct LoadedGraph {
    /// Group → root name → root.
    pub roots: BTreeMap<String, BTreeMap<String, ObjectRef>>,
    /// Every live instance by path.
    pub objects: HashMap<StructuralPath, ObjectRef>,
    /// Metadata of the loaded file.
    pub metadata: FileMetadata,
    /// Structural problems found while resolving.
    pub diagnostics: Diagnostics,
}

impl LoadedGraph {
    /// Root `name` of `group`.
    pub fn root(&self, group: &str, name: &str) -> Option<&ObjectRef> {
        self.roots.get(group).and_then(|r| r.get(name))
    }
}

impl std::fmt::Debug for LoadedGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedGraph")
            .field("groups", &self.roots.keys().collect::<Vec<_>>())
            .field("objects", &self.objects.len())
            .field("diagnostics", &self.diagnostics)
            .finish()
    }
}

/// Registries and collaborators shared by every operation.
pub struct PersistenceContext {
    /// Converters for types without members or hooks.
    pub converters: ConverterRegistry,
    /// Constructors used on load.
    pub types: TypeRegistry,
    /// Long-lived identities addressed by fixed paths.
    pub externals: ExternalIdentities,
    /// Owner of host-managed objects.
    pub host: Arc<dyn HostCollaborator>,
}

impl Default for PersistenceContext {
    fn default() -> Self {
        Self {
            converters: ConverterRegistry::new(),
            types: TypeRegistry::new(),
            externals: ExternalIdentities::new(),
            host: Arc::new(NullHost),
        }
    }
}

struct Inner {
    store: Arc<dyn SaveStore>,
    pipeline: Pipeline,
    version: SemVer,
    converters: ConverterRegistry,
    types: TypeRegistry,
    externals: RwLock<ExternalIdentities>,
    host: Arc<dyn HostCollaborator>,
}

/// Save, load, delete and metadata operations over a [`SaveStore`].
///
/// Cheap to clone; clones share the store, registries and sequencers.
/// Operations spawn tokio tasks, so they must be called from a runtime.
#[derive(Clone)]
pub struct PersistenceManager {
    inner: Arc<Inner>,
    sequencers: SequencerPool,
}

impl PersistenceManager {
    /// Create a manager.
    pub fn new(store: Arc<dyn SaveStore>, pipeline: Pipeline, version: SemVer, context: PersistenceContext) -> Self {
        info!(version = %version, pipeline = ?pipeline, "persistence manager ready");
        Self {
            inner: Arc::new(Inner {
                store,
                pipeline,
                version,
                converters: context.converters,
                types: context.types,
                externals: RwLock::new(context.externals),
                host: context.host,
            }),
            sequencers: SequencerPool::new(),
        }
    }

    /// Create a manager whose pipeline and version come from `config`.
    pub fn from_config(
        store: Arc<dyn SaveStore>,
        config: &PersistenceConfig,
        context: PersistenceContext,
    ) -> Result<Self, ConfigError> {
        let pipeline = Pipeline::from_config(config)?;
        Ok(Self::new(store, pipeline, config.version, context))
    }

    /// Running version.
    pub fn version(&self) -> SemVer {
        self.inner.version
    }

    /// Register a long-lived identity at a fixed path.
    pub fn register_external(&self, path: StructuralPath, object: &ObjectRef) {
        self.inner.externals.write().register(path, object);
    }

    /// Register a long-lived asset under the shared asset root.
    pub fn register_asset(&self, name: impl Into<String>, object: &ObjectRef) -> StructuralPath {
        self.inner.externals.write().register_asset(name, object)
    }

    /// Name of the data file for `name`.
    pub fn data_file(name: &str) -> String {
        format!("{}{}", name, DATA_FILE_SUFFIX)
    }

    /// Name the data file is staged under until its metadata is written.
    pub fn staged_data_file(name: &str) -> String {
        format!("{}{}", name, STAGED_DATA_FILE_SUFFIX)
    }

    /// Name of the metadata file for `name`.
    pub fn metadata_file(name: &str) -> String {
        format!("{}{}", name, METADATA_FILE_SUFFIX)
    }

    // ========================================================================
    // Queued operations
    // ========================================================================

    /// Capture `groups` now and queue writing them to `name`.
    pub fn submit_save(
        &self,
        name: &str,
        groups: Vec<SaveGroup>,
        user_data: UserData,
    ) -> Result<OperationHandle<Result<SaveReport, PersistError>>, PersistError> {
        let (unit, diagnostics) = self.inner.capture(&groups);
        let inner = self.inner.clone();
        let owned = name.to_string();
        let handle = self.sequencers.get(name).submit(async move {
            inner.write_unit(&owned, unit, diagnostics, user_data).await
        })?;
        Ok(handle)
    }

    /// Queue loading `name`.
    pub fn submit_load(&self, name: &str) -> Result<OperationHandle<Result<Option<LoadedGraph>, PersistError>>, PersistError> {
        let inner = self.inner.clone();
        let owned = name.to_string();
        Ok(self
            .sequencers
            .get(name)
            .submit(async move { inner.load(&owned).await })?)
    }

    /// Queue deleting both files of `name`.
    pub fn submit_delete(&self, name: &str) -> Result<OperationHandle<Result<bool, PersistError>>, PersistError> {
        let inner = self.inner.clone();
        let owned = name.to_string();
        Ok(self
            .sequencers
            .get(name)
            .submit(async move { inner.delete(&owned).await })?)
    }

    /// Queue a user-data edit of `name`'s metadata.
    pub fn submit_edit_metadata<F>(
        &self,
        name: &str,
        edit: F,
    ) -> Result<OperationHandle<Result<Option<FileMetadata>, PersistError>>, PersistError>
    where
        F: FnOnce(&mut UserData) + Send + 'static,
    {
        let inner = self.inner.clone();
        let owned = name.to_string();
        Ok(self
            .sequencers
            .get(name)
            .submit(async move { inner.edit_metadata(&owned, edit).await })?)
    }

    // ========================================================================
    // Awaited operations
    // ========================================================================

    /// Save `groups` to `name`.
    pub async fn save(&self, name: &str, groups: Vec<SaveGroup>, user_data: UserData) -> Result<SaveReport, PersistError> {
        self.submit_save(name, groups, user_data)?.wait().await?
    }

    /// Load `name`. `Ok(None)` when either file is missing.
    pub async fn load(&self, name: &str) -> Result<Option<LoadedGraph>, PersistError> {
        self.submit_load(name)?.wait().await?
    }

    /// Delete `name`. Returns whether anything was removed.
    pub async fn delete(&self, name: &str) -> Result<bool, PersistError> {
        self.submit_delete(name)?.wait().await?
    }

    /// Edit the user bag of `name`'s metadata; version and checksum are kept.
    pub async fn edit_metadata<F>(&self, name: &str, edit: F) -> Result<Option<FileMetadata>, PersistError>
    where
        F: FnOnce(&mut UserData) + Send + 'static,
    {
        self.submit_edit_metadata(name, edit)?.wait().await?
    }

    /// Metadata of `name`, without any version gate.
    pub async fn read_metadata(&self, name: &str) -> Result<Option<FileMetadata>, PersistError> {
        let inner = self.inner.clone();
        let owned = name.to_string();
        self.sequencers
            .get(name)
            .submit(async move { inner.read_metadata(&owned).await })?
            .wait()
            .await?
    }

    /// Whether both files of `name` exist.
    pub async fn exists(&self, name: &str) -> Result<bool, PersistError> {
        let inner = self.inner.clone();
        let owned = name.to_string();
        self.sequencers
            .get(name)
            .submit(async move { inner.exists(&owned).await })?
            .wait()
            .await?
    }
}

impl std::fmt::Debug for PersistenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceManager")
            .field("version", &self.inner.version)
            .field("pipeline", &self.inner.pipeline)
            .field("sequencers", &self.sequencers.len())
            .finish()
    }
}

impl Inner {
    fn capture(&self, groups: &[SaveGroup]) -> (PersistenceUnit, Diagnostics) {
        let externals = self.externals.read();
        let walker = GraphWalker::new(&self.converters, &externals);
        let builder = BufferBuilder::new(&self.converters);

        let mut unit = PersistenceUnit::new();
        let mut diagnostics = Diagnostics::new();
        for group in merge_groups(groups) {
            let discovery = walker.discover(&group.group, &group.roots);
            let instances = self.host.live_instances(&group.group);
            let (snapshot, built) = builder.build(&discovery, instances);
            diagnostics.extend(discovery.diagnostics);
            diagnostics.extend(built);
            unit.insert(snapshot);
        }
        (unit, diagnostics)
    }

    async fn write_unit(
        &self,
        name: &str,
        unit: PersistenceUnit,
        diagnostics: Diagnostics,
        user_data: UserData,
    ) -> Result<SaveReport, PersistError> {
        let sealed = self
            .pipeline
            .write(&unit)
            .map_err(|e| PersistError::pipeline(name, e))?;
        let metadata = FileMetadata::new(self.version, sealed.checksum, sealed.algorithm, user_data);
        let metadata_bytes = metadata.to_bytes().map_err(|e| PersistError::metadata(name, e))?;

        let staged = PersistenceManager::staged_data_file(name);
        self.store.write(&staged, &sealed.bytes).await?;
        if let Err(e) = self
            .store
            .write(&PersistenceManager::metadata_file(name), &metadata_bytes)
            .await
        {
            if let Err(cleanup) = self.store.delete(&staged).await {
                warn!(save = %name, error = %cleanup, "staged data file left behind");
            }
            return Err(e.into());
        }
        self.store
            .rename(&staged, &PersistenceManager::data_file(name))
            .await?;

        info!(
            save = %name,
            groups = unit.groups.len(),
            nodes = unit.node_count(),
            bytes = sealed.bytes.len(),
            errors = diagnostics.len(),
            "save committed"
        );
        Ok(SaveReport {
            metadata,
            node_count: unit.node_count(),
            diagnostics,
        })
    }

    async fn read_metadata(&self, name: &str) -> Result<Option<FileMetadata>, PersistError> {
        let Some(bytes) = self.store.read(&PersistenceManager::metadata_file(name)).await? else {
            return Ok(None);
        };
        FileMetadata::from_bytes(&bytes)
            .map(Some)
            .map_err(|e| PersistError::metadata(name, e))
    }

    async fn load(&self, name: &str) -> Result<Option<LoadedGraph>, PersistError> {
        let Some(metadata) = self.read_metadata(name).await? else {
            debug!(save = %name, "no metadata, nothing to load");
            return Ok(None);
        };
        if !metadata.is_compatible(&self.version) {
            warn!(save = %name, running = %self.version, found = %metadata.version, "version mismatch");
            return Err(PersistError::Version {
                name: name.to_string(),
                expected: self.version,
                found: metadata.version,
            });
        }

        let Some(bytes) = self.store.read(&PersistenceManager::data_file(name)).await? else {
            warn!(save = %name, "metadata present but data file missing");
            return Ok(None);
        };
        let unit: PersistenceUnit = self
            .pipeline
            .read(&bytes, &metadata.checksum, &metadata.checksum_algorithm)
            .map_err(|e| PersistError::pipeline(name, e))?;

        let graph = self.resolve(&unit, metadata);
        info!(
            save = %name,
            objects = graph.objects.len(),
            errors = graph.diagnostics.len(),
            "load complete"
        );
        Ok(Some(graph))
    }

    fn resolve(&self, unit: &PersistenceUnit, metadata: FileMetadata) -> LoadedGraph {
        let externals = self.externals.read();
        let resolved = ReferenceResolver::new(&self.types, &self.converters, &externals, self.host.as_ref()).load(unit);
        LoadedGraph {
            roots: resolved.roots,
            objects: resolved.objects,
            metadata,
            diagnostics: resolved.diagnostics,
        }
    }

    async fn delete(&self, name: &str) -> Result<bool, PersistError> {
        // Metadata first: a half-finished delete must not leave a loadable pair.
        let had_metadata = self.store.delete(&PersistenceManager::metadata_file(name)).await?;
        let had_data = self.store.delete(&PersistenceManager::data_file(name)).await?;
        self.store.delete(&PersistenceManager::staged_data_file(name)).await?;
        debug!(save = %name, had_metadata, had_data, "save deleted");
        Ok(had_metadata || had_data)
    }

    async fn edit_metadata<F>(&self, name: &str, edit: F) -> Result<Option<FileMetadata>, PersistError>
    where
        F: FnOnce(&mut UserData),
    {
        let Some(current) = self.read_metadata(name).await? else {
            return Ok(None);
        };
        let mut user_data = current.user_data.clone();
        edit(&mut user_data);
        let updated = current.with_user_data(user_data);
        let bytes = updated.to_bytes().map_err(|e| PersistError::metadata(name, e))?;
        self.store
            .write(&PersistenceManager::metadata_file(name), &bytes)
            .await?;
        Ok(Some(updated))
    }

    async fn exists(&self, name: &str) -> Result<bool, PersistError> {
        Ok(self.store.exists(&PersistenceManager::metadata_file(name)).await?
            && self.store.exists(&PersistenceManager::data_file(name)).await?)
    }
}

/// Fold groups sharing an id into one, keeping first-seen order, so each
/// group is walked once and colliding root names are caught by discovery.
fn merge_groups(groups: &[SaveGroup]) -> Vec<SaveGroup> {
    let mut merged: Vec<SaveGroup> = Vec::with_capacity(groups.len());
    for group in groups {
        match merged.iter_mut().find(|g| g.group == group.group) {
            Some(existing) => existing.roots.extend(group.roots.iter().cloned()),
            None => merged.push(group.clone()),
        }
    }
    merged
}
