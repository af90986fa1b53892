//! Substrait ⇄ native plan translation
//!
//! Decodes Substrait plans into [`subarrow_plan::Declaration`] trees and
//! exports declaration trees back into Substrait. Extension anchors are
//! tracked per plan by an [`ExtensionSet`] backed by a shared
//! [`subarrow_registry::ExtensionIdRegistry`].

pub mod error;
pub mod export;
pub mod expression;
pub mod extension_set;
pub mod json;
pub mod literal;
pub mod options;
pub mod plan;
pub mod relation;
pub mod types;

pub use error::{Result, SubstraitError};
pub use export::{serialize_plan, to_proto_plan, to_proto_rel};
pub use expression::{
    deserialize_expression, from_proto_expression, serialize_expression, to_proto_expression,
};
pub use extension_set::ExtensionSet;
pub use json::{binary_to_json, json_to_binary, plan_from_json, plan_to_json};
pub use literal::{from_proto_literal, to_proto_literal};
pub use options::{ConversionOptions, ConversionStrictness, NamedTableProvider};
pub use plan::{
    deserialize_plans, deserialize_relations, from_proto_plan, plan_fingerprint,
    PlanDeclarations, PlanRelations, SinkFactory,
};
pub use relation::{from_proto_rel, DeclarationInfo};
pub use types::{
    deserialize_schema, deserialize_type, from_proto_schema, from_proto_type, serialize_schema,
    serialize_type, to_proto_schema, to_proto_type,
};
