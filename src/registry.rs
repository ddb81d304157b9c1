//! Converter and type registries.
//!
//! ## Converter Registry
//!
//! Converters persist types that expose neither members nor hooks. Lookup is
//! a linear capability query over registrations in the order the caller made
//! them; the first converter that claims a type wins. Query results are
//! memoized per type name in an LRU cache that every registration clears,
//! so the cache can never change which converter wins.
//!
//! ## Type Registry
//!
//! Load needs to construct bare instances from the type names stored in
//! nodes. The [`TypeRegistry`] maps names to constructors. Both registries
//! are plain values handed to the core by reference; there is no global
//! state.

use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::handler::{LoadHandler, SaveHandler};
use crate::types::{ObjectRef, Persistable, StructuralError, StructuralPath};

/// Default capacity of the converter lookup cache.
pub const DEFAULT_CONVERTER_CACHE_SIZE: usize = 256;

/// Failure inside a save/load hook or converter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConvertError {
    /// A handler call failed structurally.
    #[error(transparent)]
    Structural(#[from] StructuralError),
    /// Stored data could not be decoded.
    #[error("decode failed for '{member}': {message}")]
    Decode {
        /// Member being decoded.
        member: String,
        /// Decoder message.
        message: String,
    },
    /// A required member was absent.
    #[error("missing member '{0}'")]
    MissingMember(String),
    /// The converter was handed an object of the wrong concrete type.
    #[error("converter cannot handle type {0}")]
    WrongType(String),
    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

impl ConvertError {
    /// Structural diagnostic for a failure at `path`.
    pub fn into_structural(self, path: &StructuralPath) -> StructuralError {
        match self {
            Self::Structural(structural) => structural,
            other => StructuralError::Custom {
                path: path.clone(),
                message: other.to_string(),
            },
        }
    }
}

/// Pluggable save/load handler for a family of types.
pub trait Converter: Send + Sync {
    /// Capability query: can this converter handle `type_name`?
    fn can_convert(&self, type_name: &str) -> bool;

    /// Write `object` through `handler`.
    fn save(&self, object: &dyn Persistable, handler: &mut SaveHandler<'_>) -> Result<(), ConvertError>;

    /// Build a new instance from the node behind `handler`.
    ///
    /// References must be requested through the handler's deferral methods;
    /// their targets may not exist yet.
    fn load(&self, handler: &mut LoadHandler<'_>) -> Result<ObjectRef, ConvertError>;
}

type Predicate = Box<dyn Fn(&str) -> bool + Send + Sync>;
type SaveFn = Box<dyn Fn(&dyn Persistable, &mut SaveHandler<'_>) -> Result<(), ConvertError> + Send + Sync>;
type LoadFn = Box<dyn Fn(&mut LoadHandler<'_>) -> Result<ObjectRef, ConvertError> + Send + Sync>;

/// Converter assembled from a predicate and two closures.
pub struct FnConverter {
    predicate: Predicate,
    save: SaveFn,
    load: LoadFn,
}

impl FnConverter {
    /// Create a converter from closures.
    pub fn new<P, S, L>(predicate: P, save: S, load: L) -> Self
    where
        P: Fn(&str) -> bool + Send + Sync + 'static,
        S: Fn(&dyn Persistable, &mut SaveHandler<'_>) -> Result<(), ConvertError> + Send + Sync + 'static,
        L: Fn(&mut LoadHandler<'_>) -> Result<ObjectRef, ConvertError> + Send + Sync + 'static,
    {
        Self {
            predicate: Box::new(predicate),
            save: Box::new(save),
            load: Box::new(load),
        }
    }
}

impl Converter for FnConverter {
    fn can_convert(&self, type_name: &str) -> bool {
        (self.predicate)(type_name)
    }

    fn save(&self, object: &dyn Persistable, handler: &mut SaveHandler<'_>) -> Result<(), ConvertError> {
        (self.save)(object, handler)
    }

    fn load(&self, handler: &mut LoadHandler<'_>) -> Result<ObjectRef, ConvertError> {
        (self.load)(handler)
    }
}

/// Ordered converter registry with first-match-wins lookup.
pub struct ConverterRegistry {
    converters: Vec<Arc<dyn Converter>>,
    cache: Mutex<LruCache<String, Option<usize>>>,
}

impl ConverterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::with_cache_size(DEFAULT_CONVERTER_CACHE_SIZE)
    }

    /// Create an empty registry with a custom lookup cache size.
    pub fn with_cache_size(size: usize) -> Self {
        let size = NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN);
        Self {
            converters: Vec::new(),
            cache: Mutex::new(LruCache::new(size)),
        }
    }

    /// Append a converter. Earlier registrations take precedence.
    pub fn register(&mut self, converter: impl Converter + 'static) {
        self.converters.push(Arc::new(converter));
        self.cache.lock().clear();
    }

    /// Append a converter built from a predicate and save/load closures.
    pub fn register_fn<P, S, L>(&mut self, predicate: P, save: S, load: L)
    where
        P: Fn(&str) -> bool + Send + Sync + 'static,
        S: Fn(&dyn Persistable, &mut SaveHandler<'_>) -> Result<(), ConvertError> + Send + Sync + 'static,
        L: Fn(&mut LoadHandler<'_>) -> Result<ObjectRef, ConvertError> + Send + Sync + 'static,
    {
        self.register(FnConverter::new(predicate, save, load));
    }

    /// First converter that claims `type_name`, if any.
    pub fn find(&self, type_name: &str) -> Option<Arc<dyn Converter>> {
        let mut cache = self.cache.lock();
        let index = match cache.get(type_name) {
            Some(cached) => *cached,
            None => {
                let found = self.converters.iter().position(|c| c.can_convert(type_name));
                cache.put(type_name.to_string(), found);
                found
            }
        };
        index.map(|i| Arc::clone(&self.converters[i]))
    }

    /// Whether any converter claims `type_name`.
    pub fn handles(&self, type_name: &str) -> bool {
        self.find(type_name).is_some()
    }

    /// Number of registered converters.
    pub fn len(&self) -> usize {
        self.converters.len()
    }

    /// Whether no converter is registered.
    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("converters", &self.converters.len())
            .finish()
    }
}

type Constructor = Box<dyn Fn() -> ObjectRef + Send + Sync>;

/// Type name → constructor table used on load.
#[derive(Default)]
pub struct TypeRegistry {
    constructors: HashMap<String, Constructor>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under `type_name`, replacing any previous one.
    pub fn register<F>(&mut self, type_name: impl Into<String>, constructor: F)
    where
        F: Fn() -> ObjectRef + Send + Sync + 'static,
    {
        self.constructors.insert(type_name.into(), Box::new(constructor));
    }

    /// Register `T` under the name its default instance reports.
    pub fn register_default<T: Persistable + Default>(&mut self) {
        let name = T::default().type_name();
        self.register(name, || crate::types::object(T::default()));
    }

    /// Construct a bare instance of `type_name`.
    pub fn construct(&self, type_name: &str) -> Option<ObjectRef> {
        self.constructors.get(type_name).map(|c| c())
    }

    /// Whether `type_name` can be constructed.
    pub fn contains(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.constructors.keys().collect();
        names.sort();
        f.debug_struct("TypeRegistry").field("types", &names).finish()
    }
}
