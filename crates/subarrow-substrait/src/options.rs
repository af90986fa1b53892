//! Options threaded through every translation call

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use subarrow_plan::{Declaration, FunctionRegistry, PlanError};

/// How strictly extensions declared by a plan must resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionStrictness {
    /// Every declared extension must resolve, referenced or not
    ExactRoundTrip,
    /// Unresolvable extensions only fail when an expression uses them
    #[default]
    BestEffort,
}

/// Resolves the names of a named-table read to a source declaration
pub type NamedTableProvider =
    Arc<dyn Fn(&[String]) -> Result<Declaration, PlanError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ConversionOptions {
    pub strictness: ConversionStrictness,
    pub named_table_provider: Option<NamedTableProvider>,
    /// Native functions; the shared default registry when unset
    pub function_registry: Option<Arc<FunctionRegistry>>,
}

impl ConversionOptions {
    pub fn with_strictness(mut self, strictness: ConversionStrictness) -> Self {
        self.strictness = strictness;
        self
    }

    pub fn with_named_table_provider(mut self, provider: NamedTableProvider) -> Self {
        self.named_table_provider = Some(provider);
        self
    }

    pub fn function_registry(&self) -> Arc<FunctionRegistry> {
        self.function_registry
            .clone()
            .unwrap_or_else(FunctionRegistry::default_registry)
    }
}

impl fmt::Debug for ConversionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionOptions")
            .field("strictness", &self.strictness)
            .field("named_table_provider", &self.named_table_provider.is_some())
            .field("function_registry", &self.function_registry.is_some())
            .finish()
    }
}
