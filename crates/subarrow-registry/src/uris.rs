//! Builtin extension URIs and correspondences

use arrow::datatypes::DataType;

pub const ARROW_EXTENSION_TYPES_URI: &str =
    "https://github.com/apache/arrow/blob/master/format/substrait/extension_types.yaml";

pub const SUBSTRAIT_ARITHMETIC_URI: &str =
    "https://github.com/substrait-io/substrait/blob/main/extensions/functions_arithmetic.yaml";
pub const SUBSTRAIT_COMPARISON_URI: &str =
    "https://github.com/substrait-io/substrait/blob/main/extensions/functions_comparison.yaml";
pub const SUBSTRAIT_BOOLEAN_URI: &str =
    "https://github.com/substrait-io/substrait/blob/main/extensions/functions_boolean.yaml";
pub const SUBSTRAIT_AGGREGATE_GENERIC_URI: &str =
    "https://github.com/substrait-io/substrait/blob/main/extensions/functions_aggregate_generic.yaml";

const BUILTIN_URIS: &[&str] = &[
    ARROW_EXTENSION_TYPES_URI,
    SUBSTRAIT_ARITHMETIC_URI,
    SUBSTRAIT_COMPARISON_URI,
    SUBSTRAIT_BOOLEAN_URI,
    SUBSTRAIT_AGGREGATE_GENERIC_URI,
];

/// Types with no Substrait primitive, carried as Arrow extension types
pub const BUILTIN_TYPES: &[(&str, DataType)] = &[
    ("null", DataType::Null),
    ("u8", DataType::UInt8),
    ("u16", DataType::UInt16),
    ("u32", DataType::UInt32),
    ("u64", DataType::UInt64),
];

/// (uri, Substrait name, native name)
pub const BUILTIN_FUNCTIONS: &[(&str, &str, &str)] = &[
    (SUBSTRAIT_ARITHMETIC_URI, "add", "add"),
    (SUBSTRAIT_ARITHMETIC_URI, "subtract", "subtract"),
    (SUBSTRAIT_ARITHMETIC_URI, "multiply", "multiply"),
    (SUBSTRAIT_ARITHMETIC_URI, "divide", "divide"),
    (SUBSTRAIT_ARITHMETIC_URI, "negate", "negate"),
    (SUBSTRAIT_ARITHMETIC_URI, "abs", "abs"),
    (SUBSTRAIT_ARITHMETIC_URI, "power", "power"),
    (SUBSTRAIT_ARITHMETIC_URI, "sqrt", "sqrt"),
    (SUBSTRAIT_ARITHMETIC_URI, "sum", "sum"),
    (SUBSTRAIT_ARITHMETIC_URI, "avg", "mean"),
    (SUBSTRAIT_ARITHMETIC_URI, "min", "min"),
    (SUBSTRAIT_ARITHMETIC_URI, "max", "max"),
    (SUBSTRAIT_COMPARISON_URI, "equal", "equal"),
    (SUBSTRAIT_COMPARISON_URI, "not_equal", "not_equal"),
    (SUBSTRAIT_COMPARISON_URI, "lt", "less"),
    (SUBSTRAIT_COMPARISON_URI, "lte", "less_equal"),
    (SUBSTRAIT_COMPARISON_URI, "gt", "greater"),
    (SUBSTRAIT_COMPARISON_URI, "gte", "greater_equal"),
    (SUBSTRAIT_COMPARISON_URI, "is_null", "is_null"),
    (SUBSTRAIT_COMPARISON_URI, "is_not_null", "is_valid"),
    (
        SUBSTRAIT_COMPARISON_URI,
        "is_not_distinct_from",
        "is_not_distinct_from",
    ),
    (SUBSTRAIT_BOOLEAN_URI, "and", "and_kleene"),
    (SUBSTRAIT_BOOLEAN_URI, "or", "or_kleene"),
    (SUBSTRAIT_BOOLEAN_URI, "not", "invert"),
    (SUBSTRAIT_BOOLEAN_URI, "xor", "xor"),
    (SUBSTRAIT_AGGREGATE_GENERIC_URI, "count", "count"),
];

fn file_name(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}

/// Map a URI that names a builtin file only by path (as some producers
/// emit, e.g. `/functions_arithmetic.yaml`) onto the builtin URI
pub fn canonical_uri(uri: &str) -> String {
    if BUILTIN_URIS.contains(&uri) {
        return uri.to_string();
    }
    let name = file_name(uri);
    BUILTIN_URIS
        .iter()
        .find(|builtin| !name.is_empty() && file_name(builtin) == name)
        .map(|builtin| builtin.to_string())
        .unwrap_or_else(|| uri.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_uri() {
        assert_eq!(
            canonical_uri("/functions_arithmetic.yaml"),
            SUBSTRAIT_ARITHMETIC_URI
        );
        assert_eq!(
            canonical_uri(SUBSTRAIT_BOOLEAN_URI),
            SUBSTRAIT_BOOLEAN_URI
        );
        assert_eq!(canonical_uri("urn:custom"), "urn:custom");
    }
}
