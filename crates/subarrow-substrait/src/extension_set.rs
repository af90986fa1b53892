//! Per-plan table of extension anchors
//!
//! A Substrait plan refers to extension types and functions by small integer
//! anchors declared in its extension block. An [`ExtensionSet`] holds those
//! declarations for one translation session. Resolution of an anchor to a
//! native type or function goes through the registry once and is memoized in
//! the anchor's slot.

#![allow(deprecated)]

use std::cell::OnceCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use arrow::datatypes::DataType;
use substrait::proto::extensions::simple_extension_declaration::{
    ExtensionFunction, ExtensionType, MappingType,
};
use substrait::proto::extensions::{SimpleExtensionDeclaration, SimpleExtensionUri};
use subarrow_registry::{default_registry, ExtensionIdRegistry, Id};
use tracing::{trace, warn};

use crate::error::{invalid, not_implemented, Result, SubstraitError};
use crate::options::ConversionStrictness;

#[derive(Debug)]
struct TypeSlot {
    anchor: u32,
    id: Id,
    resolved: OnceCell<Option<DataType>>,
}

#[derive(Debug)]
struct FunctionSlot {
    anchor: u32,
    id: Id,
    resolved: OnceCell<Option<String>>,
}

#[derive(Debug)]
pub struct ExtensionSet {
    registry: Arc<ExtensionIdRegistry>,
    uris: BTreeMap<u32, String>,
    types: Vec<TypeSlot>,
    type_anchors: HashMap<u32, usize>,
    functions: Vec<FunctionSlot>,
    function_anchors: HashMap<u32, usize>,
}

impl Default for ExtensionSet {
    fn default() -> Self {
        Self::new(default_registry())
    }
}

fn free_anchor<V>(taken: &HashMap<u32, V>, start: u32) -> u32 {
    (start..).find(|a| !taken.contains_key(a)).unwrap_or(u32::MAX)
}

impl ExtensionSet {
    /// An empty set for exporting plans
    pub fn new(registry: Arc<ExtensionIdRegistry>) -> Self {
        Self {
            registry,
            uris: BTreeMap::new(),
            types: Vec::new(),
            type_anchors: HashMap::new(),
            functions: Vec::new(),
            function_anchors: HashMap::new(),
        }
    }

    /// Build from a plan's extension URI and declaration blocks
    pub fn from_proto(
        uris: &[SimpleExtensionUri],
        declarations: &[SimpleExtensionDeclaration],
        registry: Arc<ExtensionIdRegistry>,
        strictness: ConversionStrictness,
    ) -> Result<Self> {
        let mut set = Self::new(registry);
        for uri in uris {
            if set
                .uris
                .insert(uri.extension_uri_anchor, uri.uri.clone())
                .is_some()
            {
                return Err(invalid(format!(
                    "extension uri anchor {} declared twice",
                    uri.extension_uri_anchor
                )));
            }
        }

        for declaration in declarations {
            match &declaration.mapping_type {
                Some(MappingType::ExtensionType(ty)) => {
                    let id = Id::new(set.uri(ty.extension_uri_reference)?, ty.name.clone());
                    if set.type_anchors.contains_key(&ty.type_anchor) {
                        return Err(invalid(format!(
                            "type anchor {} declared twice",
                            ty.type_anchor
                        )));
                    }
                    set.push_type(ty.type_anchor, id);
                }
                Some(MappingType::ExtensionFunction(func)) => {
                    let id = Id::new(set.uri(func.extension_uri_reference)?, func.name.clone());
                    if set.function_anchors.contains_key(&func.function_anchor) {
                        return Err(invalid(format!(
                            "function anchor {} declared twice",
                            func.function_anchor
                        )));
                    }
                    set.push_function(func.function_anchor, id);
                }
                Some(MappingType::ExtensionTypeVariation(variation)) => {
                    return Err(not_implemented(format!(
                        "type variation '{}'",
                        variation.name
                    )))
                }
                None => return Err(invalid("extension declaration without a mapping")),
            }
        }

        if strictness == ConversionStrictness::ExactRoundTrip {
            for slot in &set.types {
                if set.resolve_type(slot).is_none() {
                    return Err(invalid(format!(
                        "extension type {} could not be resolved and exact round trip was requested",
                        slot.id
                    )));
                }
            }
            for slot in &set.functions {
                if set.resolve_function(slot).is_none() {
                    return Err(invalid(format!(
                        "extension function {} could not be resolved and exact round trip was requested",
                        slot.id
                    )));
                }
            }
        }
        Ok(set)
    }

    fn uri(&self, anchor: u32) -> Result<String> {
        self.uris.get(&anchor).cloned().ok_or_else(|| {
            invalid(format!(
                "extension declaration references undeclared uri anchor {anchor}"
            ))
        })
    }

    fn push_type(&mut self, anchor: u32, id: Id) -> usize {
        let index = self.types.len();
        self.types.push(TypeSlot {
            anchor,
            id,
            resolved: OnceCell::new(),
        });
        self.type_anchors.insert(anchor, index);
        index
    }

    fn push_function(&mut self, anchor: u32, id: Id) -> usize {
        let index = self.functions.len();
        self.functions.push(FunctionSlot {
            anchor,
            id,
            resolved: OnceCell::new(),
        });
        self.function_anchors.insert(anchor, index);
        index
    }

    fn resolve_type<'a>(&self, slot: &'a TypeSlot) -> Option<&'a DataType> {
        slot.resolved
            .get_or_init(|| {
                trace!(anchor = slot.anchor, id = %slot.id, "resolving extension type");
                self.registry.decode_type(&slot.id)
            })
            .as_ref()
    }

    fn resolve_function<'a>(&self, slot: &'a FunctionSlot) -> Option<&'a String> {
        slot.resolved
            .get_or_init(|| {
                trace!(anchor = slot.anchor, id = %slot.id, "resolving extension function");
                self.registry.decode_function(&slot.id)
            })
            .as_ref()
    }

    fn ensure_uri(&mut self, uri: &str) -> u32 {
        if let Some((anchor, _)) = self.uris.iter().find(|(_, u)| u.as_str() == uri) {
            return *anchor;
        }
        let anchor = (1..)
            .find(|a| !self.uris.contains_key(a))
            .unwrap_or(u32::MAX);
        self.uris.insert(anchor, uri.to_string());
        anchor
    }

    pub fn registry(&self) -> &Arc<ExtensionIdRegistry> {
        &self.registry
    }

    pub fn num_types(&self) -> usize {
        self.types.len()
    }

    pub fn num_functions(&self) -> usize {
        self.functions.len()
    }

    /// Declared URIs by anchor
    pub fn uris(&self) -> &BTreeMap<u32, String> {
        &self.uris
    }

    /// Native type bound to a type anchor
    pub fn decode_type(&self, anchor: u32) -> Result<DataType> {
        let slot = self
            .type_anchors
            .get(&anchor)
            .and_then(|&index| self.types.get(index))
            .ok_or_else(|| SubstraitError::NotFound(format!("type anchor {anchor}")))?;
        self.resolve_type(slot).cloned().ok_or_else(|| {
            warn!(anchor, id = %slot.id, "extension type is not registered");
            not_implemented(format!(
                "extension type {} has no native counterpart",
                slot.id
            ))
        })
    }

    /// Id declared for a function anchor
    pub fn function_id(&self, anchor: u32) -> Result<&Id> {
        self.function_anchors
            .get(&anchor)
            .and_then(|&index| self.functions.get(index))
            .map(|slot| &slot.id)
            .ok_or_else(|| SubstraitError::NotFound(format!("function anchor {anchor}")))
    }

    /// Native function name bound to a function anchor
    pub fn decode_function(&self, anchor: u32) -> Result<String> {
        let slot = self
            .function_anchors
            .get(&anchor)
            .and_then(|&index| self.functions.get(index))
            .ok_or_else(|| SubstraitError::NotFound(format!("function anchor {anchor}")))?;
        self.resolve_function(slot).cloned().ok_or_else(|| {
            warn!(anchor, id = %slot.id, "extension function is not registered");
            not_implemented(format!(
                "extension function {} has no native counterpart",
                slot.id
            ))
        })
    }

    /// Anchor for a native type that needs an extension declaration,
    /// allocating one on first use
    pub fn encode_type(&mut self, data_type: &DataType) -> Result<u32> {
        let id = self.registry.encode_type(data_type).ok_or_else(|| {
            not_implemented(format!("type {data_type} has no Substrait equivalent"))
        })?;
        if let Some(slot) = self.types.iter().find(|slot| slot.id == id) {
            return Ok(slot.anchor);
        }
        self.ensure_uri(&id.uri);
        let anchor = free_anchor(&self.type_anchors, 0);
        let index = self.push_type(anchor, id);
        let _ = self.types[index].resolved.set(Some(data_type.clone()));
        Ok(anchor)
    }

    /// Anchor for a native function, allocating one on first use
    pub fn encode_function(&mut self, native_name: &str) -> Result<u32> {
        let id = self.registry.encode_function(native_name).ok_or_else(|| {
            not_implemented(format!(
                "native function '{native_name}' has no Substrait equivalent"
            ))
        })?;
        if let Some(slot) = self.functions.iter().find(|slot| slot.id == id) {
            return Ok(slot.anchor);
        }
        self.ensure_uri(&id.uri);
        let anchor = free_anchor(&self.function_anchors, 0);
        let index = self.push_function(anchor, id);
        let _ = self.functions[index]
            .resolved
            .set(Some(native_name.to_string()));
        Ok(anchor)
    }

    /// The extension URI and declaration blocks for a plan
    pub fn to_proto(&self) -> Result<(Vec<SimpleExtensionUri>, Vec<SimpleExtensionDeclaration>)> {
        let uri_anchor = |uri: &str| {
            self.uris
                .iter()
                .find(|(_, u)| u.as_str() == uri)
                .map(|(anchor, _)| *anchor)
                .ok_or_else(|| invalid(format!("uri {uri} was never declared")))
        };

        let uris = self
            .uris
            .iter()
            .map(|(anchor, uri)| SimpleExtensionUri {
                extension_uri_anchor: *anchor,
                uri: uri.clone(),
                ..Default::default()
            })
            .collect();

        let mut types: Vec<&TypeSlot> = self.types.iter().collect();
        types.sort_by_key(|slot| slot.anchor);
        let mut functions: Vec<&FunctionSlot> = self.functions.iter().collect();
        functions.sort_by_key(|slot| slot.anchor);

        let mut declarations = Vec::with_capacity(types.len() + functions.len());
        for slot in types {
            declarations.push(SimpleExtensionDeclaration {
                mapping_type: Some(MappingType::ExtensionType(ExtensionType {
                    extension_uri_reference: uri_anchor(&slot.id.uri)?,
                    type_anchor: slot.anchor,
                    name: slot.id.name.clone(),
                    ..Default::default()
                })),
            });
        }
        for slot in functions {
            declarations.push(SimpleExtensionDeclaration {
                mapping_type: Some(MappingType::ExtensionFunction(ExtensionFunction {
                    extension_uri_reference: uri_anchor(&slot.id.uri)?,
                    function_anchor: slot.anchor,
                    name: slot.id.name.clone(),
                    ..Default::default()
                })),
            });
        }
        Ok((uris, declarations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use subarrow_registry::{ARROW_EXTENSION_TYPES_URI, SUBSTRAIT_ARITHMETIC_URI};

    fn function_decl(uri_anchor: u32, anchor: u32, name: &str) -> SimpleExtensionDeclaration {
        SimpleExtensionDeclaration {
            mapping_type: Some(MappingType::ExtensionFunction(ExtensionFunction {
                extension_uri_reference: uri_anchor,
                function_anchor: anchor,
                name: name.to_string(),
                ..Default::default()
            })),
        }
    }

    fn uri(anchor: u32, uri: &str) -> SimpleExtensionUri {
        SimpleExtensionUri {
            extension_uri_anchor: anchor,
            uri: uri.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_encode_type_is_stable() {
        let mut set = ExtensionSet::default();
        let first = set.encode_type(&DataType::UInt32).unwrap();
        let second = set.encode_type(&DataType::UInt32).unwrap();
        assert_eq!(first, 0);
        assert_eq!(first, second);
        assert_eq!(set.num_types(), 1);

        let other = set.encode_type(&DataType::UInt8).unwrap();
        assert_eq!(other, 1);
        assert_eq!(set.num_types(), 2);
        assert_eq!(set.uris().len(), 1);
        assert_eq!(set.decode_type(other).unwrap(), DataType::UInt8);
    }

    #[test]
    fn test_encode_unmapped_type() {
        let mut set = ExtensionSet::default();
        assert!(matches!(
            set.encode_type(&DataType::Int32),
            Err(SubstraitError::NotImplemented(_))
        ));
    }

    #[test]
    fn test_encode_function_is_stable() {
        let mut set = ExtensionSet::default();
        let add = set.encode_function("add").unwrap();
        let less = set.encode_function("less").unwrap();
        assert_eq!(set.encode_function("add").unwrap(), add);
        assert_ne!(add, less);
        assert_eq!(set.num_functions(), 2);
        // arithmetic and comparison files
        assert_eq!(set.uris().len(), 2);
        assert_eq!(set.uris().keys().next(), Some(&1));
    }

    #[test]
    fn test_from_proto_and_decode() {
        let set = ExtensionSet::from_proto(
            &[uri(42, SUBSTRAIT_ARITHMETIC_URI)],
            &[function_decl(42, 42, "add")],
            default_registry(),
            ConversionStrictness::BestEffort,
        )
        .unwrap();
        assert_eq!(set.decode_function(42).unwrap(), "add");
        assert_eq!(
            set.function_id(42).unwrap(),
            &Id::new(SUBSTRAIT_ARITHMETIC_URI, "add")
        );
        assert!(matches!(
            set.decode_function(7),
            Err(SubstraitError::NotFound(_))
        ));
        assert!(matches!(set.decode_type(0), Err(SubstraitError::NotFound(_))));
    }

    #[test]
    fn test_undeclared_uri_anchor() {
        let result = ExtensionSet::from_proto(
            &[uri(1, SUBSTRAIT_ARITHMETIC_URI)],
            &[function_decl(2, 0, "add")],
            default_registry(),
            ConversionStrictness::BestEffort,
        );
        assert!(matches!(result, Err(SubstraitError::Invalid(_))));
    }

    #[test]
    fn test_unresolved_function_under_strictness() {
        let decls = [function_decl(1, 0, "no_such_function")];
        let uris = [uri(1, SUBSTRAIT_ARITHMETIC_URI)];

        let lenient = ExtensionSet::from_proto(
            &uris,
            &decls,
            default_registry(),
            ConversionStrictness::BestEffort,
        )
        .unwrap();
        assert!(matches!(
            lenient.decode_function(0),
            Err(SubstraitError::NotImplemented(_))
        ));

        let strict = ExtensionSet::from_proto(
            &uris,
            &decls,
            default_registry(),
            ConversionStrictness::ExactRoundTrip,
        );
        assert!(matches!(strict, Err(SubstraitError::Invalid(_))));
    }

    #[test]
    fn test_resolution_memoized_in_slot() {
        let registry = Arc::new(ExtensionIdRegistry::nested(default_registry()));
        let set = ExtensionSet::from_proto(
            &[uri(1, "urn:example")],
            &[function_decl(1, 0, "late")],
            registry.clone(),
            ConversionStrictness::BestEffort,
        )
        .unwrap();
        assert!(set.decode_function(0).is_err());

        // the slot already holds the failed lookup
        registry
            .register_function(Id::new("urn:example", "late"), "add")
            .unwrap();
        assert!(set.decode_function(0).is_err());
    }

    #[test]
    fn test_to_proto_blocks() {
        let mut set = ExtensionSet::default();
        set.encode_type(&DataType::UInt64).unwrap();
        set.encode_function("add").unwrap();
        let (uris, decls) = set.to_proto().unwrap();
        assert_eq!(uris.len(), 2);
        assert_eq!(decls.len(), 2);
        assert!(uris.iter().any(|u| u.uri == ARROW_EXTENSION_TYPES_URI));
        assert!(matches!(
            decls[0].mapping_type,
            Some(MappingType::ExtensionType(_))
        ));
    }
}
