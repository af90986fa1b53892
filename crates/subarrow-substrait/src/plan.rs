//! Plan documents: decoding, sink attachment and fingerprints

#![allow(deprecated)]

use std::sync::Arc;

use prost::Message;
use sha2::{Digest, Sha256};
use substrait::proto::plan_rel::RelType as PlanRelType;
use substrait::proto::Plan;
use subarrow_plan::{
    ConsumingSinkNodeOptions, Declaration, NodeOptions, SinkConsumer, SinkNodeOptions,
    WriteNodeOptions,
};
use subarrow_registry::{default_registry, ExtensionIdRegistry};
use tracing::debug;

use crate::error::{invalid, Result};
use crate::extension_set::ExtensionSet;
use crate::options::ConversionOptions;
use crate::relation::{from_proto_rel, rename_root, DeclarationInfo};

/// How each top-level relation of a plan is terminated
pub enum SinkFactory<'a> {
    /// Collect batches in memory through a fresh [`subarrow_plan::BatchCollector`]
    Collect,
    /// Feed a consumer; called once per relation, `None` means exhausted
    Consumer(&'a dyn Fn() -> Option<Arc<dyn SinkConsumer>>),
    /// Write files; called once per relation, `None` means exhausted
    Write(&'a dyn Fn() -> Option<WriteNodeOptions>),
}

/// The relations of a plan before any sink is attached
#[derive(Debug)]
pub struct PlanRelations {
    pub relations: Vec<DeclarationInfo>,
    pub extension_set: ExtensionSet,
}

/// Sink-terminated declarations, one per top-level relation
#[derive(Debug)]
pub struct PlanDeclarations {
    pub declarations: Vec<Declaration>,
    pub extension_set: ExtensionSet,
}

/// Hex SHA-256 of a serialized plan
pub fn plan_fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Translate every top-level relation of a decoded plan
pub fn from_proto_plan(
    plan: &Plan,
    registry: Option<Arc<ExtensionIdRegistry>>,
    options: &ConversionOptions,
) -> Result<PlanRelations> {
    if let Some(version) = &plan.version {
        debug!(
            minor = version.minor_number,
            producer = %version.producer,
            "plan version"
        );
    }
    let extension_set = ExtensionSet::from_proto(
        &plan.extension_uris,
        &plan.extensions,
        registry.unwrap_or_else(default_registry),
        options.strictness,
    )?;
    let fn_registry = options.function_registry();

    let mut relations = Vec::with_capacity(plan.relations.len());
    for plan_rel in &plan.relations {
        let info = match &plan_rel.rel_type {
            Some(PlanRelType::Rel(rel)) => from_proto_rel(rel, &extension_set, options)?,
            Some(PlanRelType::Root(root)) => {
                let input = root
                    .input
                    .as_ref()
                    .ok_or_else(|| invalid("root relation has no input"))?;
                let info = from_proto_rel(input, &extension_set, options)?;
                rename_root(info, &root.names, &fn_registry)?
            }
            None => return Err(invalid("plan relation with no rel type")),
        };
        relations.push(info);
    }
    Ok(PlanRelations {
        relations,
        extension_set,
    })
}

/// Decode and translate a plan without attaching sinks
pub fn deserialize_relations(
    bytes: &[u8],
    registry: Option<Arc<ExtensionIdRegistry>>,
    options: &ConversionOptions,
) -> Result<PlanRelations> {
    let plan = Plan::decode(bytes)?;
    debug!(
        fingerprint = %plan_fingerprint(bytes),
        relations = plan.relations.len(),
        "translating plan"
    );
    from_proto_plan(&plan, registry, options)
}

fn attach_sink(info: DeclarationInfo, sink: &SinkFactory<'_>) -> Result<Declaration> {
    let options = match sink {
        SinkFactory::Collect => NodeOptions::Sink(SinkNodeOptions::default()),
        SinkFactory::Consumer(factory) => {
            let consumer = factory().ok_or_else(|| {
                invalid("consumer factory is exhausted or returned no consumer")
            })?;
            NodeOptions::ConsumingSink(ConsumingSinkNodeOptions { consumer })
        }
        SinkFactory::Write(factory) => NodeOptions::Write(factory().ok_or_else(|| {
            invalid("write options factory is exhausted or returned no options")
        })?),
    };
    Ok(Declaration::new(options, vec![info.declaration]))
}

/// Decode a plan and terminate each of its relations with a sink
pub fn deserialize_plans(
    bytes: &[u8],
    sink: SinkFactory<'_>,
    registry: Option<Arc<ExtensionIdRegistry>>,
    options: &ConversionOptions,
) -> Result<PlanDeclarations> {
    let PlanRelations {
        relations,
        extension_set,
    } = deserialize_relations(bytes, registry, options)?;
    let declarations = relations
        .into_iter()
        .map(|info| attach_sink(info, &sink))
        .collect::<Result<Vec<_>>>()?;
    Ok(PlanDeclarations {
        declarations,
        extension_set,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let a = plan_fingerprint(b"plan");
        assert_eq!(a.len(), 64);
        assert_eq!(a, plan_fingerprint(b"plan"));
        assert_ne!(a, plan_fingerprint(b"other plan"));
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        let result = deserialize_relations(&[0xff, 0xff, 0xff], None, &ConversionOptions::default());
        assert!(matches!(
            result,
            Err(crate::error::SubstraitError::Decode(_))
        ));
    }

    #[test]
    fn test_empty_plan_has_no_relations() {
        let bytes = Plan::default().encode_to_vec();
        let plans = deserialize_plans(
            &bytes,
            SinkFactory::Collect,
            None,
            &ConversionOptions::default(),
        )
        .unwrap();
        assert!(plans.declarations.is_empty());
    }
}
