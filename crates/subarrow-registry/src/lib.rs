//! Extension id registry
//!
//! Maps Substrait extension identifiers (URI + name) to native Arrow types
//! and native function names, in both directions. A process-wide default
//! registry holds the builtin correspondences; callers that need isolation
//! create a nested registry that falls back to a parent for anything it does
//! not define itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, RwLock};

use arrow::datatypes::DataType;
use thiserror::Error;
use tracing::{debug, trace};

pub mod uris;

pub use uris::{
    ARROW_EXTENSION_TYPES_URI, SUBSTRAIT_AGGREGATE_GENERIC_URI, SUBSTRAIT_ARITHMETIC_URI,
    SUBSTRAIT_BOOLEAN_URI, SUBSTRAIT_COMPARISON_URI,
};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Extension type {id} is already registered as {existing}")]
    TypeAlreadyRegistered { id: Id, existing: DataType },

    #[error("Extension function {id} is already registered as '{existing}'")]
    FunctionAlreadyRegistered { id: Id, existing: String },

    #[error("Registry lock poisoned")]
    Poisoned,
}

/// Extension identifier: the URI of the YAML file defining the extension and
/// the name it is declared under
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id {
    pub uri: String,
    pub name: String,
}

impl Id {
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
        }
    }

    /// The id with any `:signature` suffix removed from the name and the URI
    /// mapped onto a builtin URI when only the file name matches
    pub fn normalized(&self) -> Id {
        let name = match self.name.split_once(':') {
            Some((base, _)) => base,
            None => self.name.as_str(),
        };
        Id::new(uris::canonical_uri(&self.uri), name)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.uri, self.name)
    }
}

#[derive(Debug, Default)]
struct Tables {
    id_to_type: HashMap<Id, DataType>,
    type_to_id: HashMap<DataType, Id>,
    id_to_function: HashMap<Id, String>,
    function_to_id: HashMap<String, Id>,
}

#[derive(Debug, Default)]
pub struct ExtensionIdRegistry {
    parent: Option<Arc<ExtensionIdRegistry>>,
    tables: RwLock<Tables>,
}

static DEFAULT_REGISTRY: LazyLock<Arc<ExtensionIdRegistry>> =
    LazyLock::new(|| Arc::new(ExtensionIdRegistry::with_builtins()));

/// The process-wide registry holding the builtin correspondences
pub fn default_registry() -> Arc<ExtensionIdRegistry> {
    DEFAULT_REGISTRY.clone()
}

impl ExtensionIdRegistry {
    /// An empty registry with no parent
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh registry holding the builtin correspondences
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        let mut tables = Tables::default();
        for (name, data_type) in uris::BUILTIN_TYPES {
            let id = Id::new(ARROW_EXTENSION_TYPES_URI, *name);
            tables.type_to_id.insert(data_type.clone(), id.clone());
            tables.id_to_type.insert(id, data_type.clone());
        }
        for (uri, substrait_name, native_name) in uris::BUILTIN_FUNCTIONS {
            let id = Id::new(*uri, *substrait_name);
            tables
                .function_to_id
                .entry(native_name.to_string())
                .or_insert_with(|| id.clone());
            tables.id_to_function.insert(id, native_name.to_string());
        }
        match registry.tables.write() {
            Ok(mut guard) => *guard = tables,
            Err(poisoned) => *poisoned.into_inner() = tables,
        }
        registry
    }

    /// A child registry: lookups fall back to `parent`, registrations stay
    /// local to the child
    pub fn nested(parent: Arc<ExtensionIdRegistry>) -> Self {
        Self {
            parent: Some(parent),
            tables: RwLock::default(),
        }
    }

    pub fn parent(&self) -> Option<&Arc<ExtensionIdRegistry>> {
        self.parent.as_ref()
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> Option<T>) -> Option<T> {
        let guard = self.tables.read().ok()?;
        f(&guard)
    }

    /// Native type bound to `id`
    pub fn decode_type(&self, id: &Id) -> Option<DataType> {
        let normalized = id.normalized();
        let local = self.read(|tables| {
            tables
                .id_to_type
                .get(id)
                .or_else(|| tables.id_to_type.get(&normalized))
                .cloned()
        });
        trace!(%id, found = local.is_some(), "decode extension type");
        local.or_else(|| self.parent.as_ref().and_then(|p| p.decode_type(id)))
    }

    /// Extension id for a native type that has no builtin Substrait kind
    pub fn encode_type(&self, data_type: &DataType) -> Option<Id> {
        self.read(|tables| tables.type_to_id.get(data_type).cloned())
            .or_else(|| self.parent.as_ref().and_then(|p| p.encode_type(data_type)))
    }

    /// Native function name bound to `id`
    pub fn decode_function(&self, id: &Id) -> Option<String> {
        let normalized = id.normalized();
        let local = self.read(|tables| {
            tables
                .id_to_function
                .get(id)
                .or_else(|| tables.id_to_function.get(&normalized))
                .cloned()
        });
        trace!(%id, found = local.is_some(), "decode extension function");
        local.or_else(|| self.parent.as_ref().and_then(|p| p.decode_function(id)))
    }

    /// Extension id a native function is exported as
    pub fn encode_function(&self, native_name: &str) -> Option<Id> {
        self.read(|tables| tables.function_to_id.get(native_name).cloned())
            .or_else(|| {
                self.parent
                    .as_ref()
                    .and_then(|p| p.encode_function(native_name))
            })
    }

    /// Bind `id` to `data_type`. Re-registering the same binding succeeds,
    /// binding an id to a different type fails.
    pub fn register_type(&self, id: Id, data_type: DataType) -> Result<(), RegistryError> {
        if let Some(existing) = self.decode_type(&id) {
            if existing == data_type {
                return Ok(());
            }
            return Err(RegistryError::TypeAlreadyRegistered { id, existing });
        }
        let mut tables = self.tables.write().map_err(|_| RegistryError::Poisoned)?;
        // Another session may have won the race since the check above
        if let Some(existing) = tables.id_to_type.get(&id) {
            if existing == &data_type {
                return Ok(());
            }
            return Err(RegistryError::TypeAlreadyRegistered {
                id,
                existing: existing.clone(),
            });
        }
        debug!(%id, %data_type, "registering extension type");
        tables
            .type_to_id
            .entry(data_type.clone())
            .or_insert_with(|| id.clone());
        tables.id_to_type.insert(id, data_type);
        Ok(())
    }

    /// Bind `id` to the native function `native_name`
    pub fn register_function(
        &self,
        id: Id,
        native_name: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let native_name = native_name.into();
        if let Some(existing) = self.decode_function(&id) {
            if existing == native_name {
                return Ok(());
            }
            return Err(RegistryError::FunctionAlreadyRegistered { id, existing });
        }
        let mut tables = self.tables.write().map_err(|_| RegistryError::Poisoned)?;
        if let Some(existing) = tables.id_to_function.get(&id) {
            if existing == &native_name {
                return Ok(());
            }
            return Err(RegistryError::FunctionAlreadyRegistered {
                id,
                existing: existing.clone(),
            });
        }
        debug!(%id, native = %native_name, "registering extension function");
        tables
            .function_to_id
            .entry(native_name.clone())
            .or_insert_with(|| id.clone());
        tables.id_to_function.insert(id, native_name);
        Ok(())
    }

    /// Every type id visible through this registry, sorted
    pub fn type_ids(&self) -> Vec<Id> {
        let mut ids = self.parent.as_ref().map(|p| p.type_ids()).unwrap_or_default();
        if let Ok(tables) = self.tables.read() {
            ids.extend(tables.id_to_type.keys().cloned());
        }
        ids.sort();
        ids.dedup();
        ids
    }

    /// Every function id visible through this registry, sorted
    pub fn function_ids(&self) -> Vec<Id> {
        let mut ids = self
            .parent
            .as_ref()
            .map(|p| p.function_ids())
            .unwrap_or_default();
        if let Ok(tables) = self.tables.read() {
            ids.extend(tables.id_to_function.keys().cloned());
        }
        ids.sort();
        ids.dedup();
        ids
    }
}
