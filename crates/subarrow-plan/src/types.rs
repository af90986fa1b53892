//! Arrow extension-type tagging for types that only differ from their
//! storage type by metadata

use std::collections::HashMap;

use arrow::datatypes::{DataType, Field};

pub const EXTENSION_NAME_KEY: &str = "ARROW:extension:name";
pub const EXTENSION_METADATA_KEY: &str = "ARROW:extension:metadata";

pub const UUID_EXTENSION: &str = "arrow.uuid";
pub const FIXED_CHAR_EXTENSION: &str = "arrow.substrait.fixed_char";
pub const VARCHAR_EXTENSION: &str = "arrow.substrait.varchar";

/// Logical types carried as annotated Arrow storage types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionType {
    Uuid,
    FixedChar(i32),
    VarChar(i32),
}

impl ExtensionType {
    pub fn storage_type(&self) -> DataType {
        match self {
            ExtensionType::Uuid => DataType::FixedSizeBinary(16),
            ExtensionType::FixedChar(_) | ExtensionType::VarChar(_) => DataType::Utf8,
        }
    }

    pub fn metadata(&self) -> HashMap<String, String> {
        let (name, meta) = match self {
            ExtensionType::Uuid => (UUID_EXTENSION, String::new()),
            ExtensionType::FixedChar(length) => (FIXED_CHAR_EXTENSION, length.to_string()),
            ExtensionType::VarChar(length) => (VARCHAR_EXTENSION, length.to_string()),
        };
        HashMap::from([
            (EXTENSION_NAME_KEY.to_string(), name.to_string()),
            (EXTENSION_METADATA_KEY.to_string(), meta),
        ])
    }

    /// Build a field of this type
    pub fn field(&self, name: impl Into<String>, nullable: bool) -> Field {
        Field::new(name, self.storage_type(), nullable).with_metadata(self.metadata())
    }

    /// Recognize an annotated field. Unknown extension names yield `None`.
    pub fn from_field(field: &Field) -> Option<Self> {
        let metadata = field.metadata();
        let name = metadata.get(EXTENSION_NAME_KEY)?;
        let length = || {
            metadata
                .get(EXTENSION_METADATA_KEY)
                .and_then(|m| m.parse::<i32>().ok())
        };
        match name.as_str() {
            UUID_EXTENSION if field.data_type() == &DataType::FixedSizeBinary(16) => {
                Some(ExtensionType::Uuid)
            }
            FIXED_CHAR_EXTENSION if field.data_type() == &DataType::Utf8 => {
                length().map(ExtensionType::FixedChar)
            }
            VARCHAR_EXTENSION if field.data_type() == &DataType::Utf8 => {
                length().map(ExtensionType::VarChar)
            }
            _ => None,
        }
    }
}

/// True if `key` is one of the keys used for extension tagging
pub fn is_extension_key(key: &str) -> bool {
    key == EXTENSION_NAME_KEY || key == EXTENSION_METADATA_KEY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_field_round_trip() {
        for ext in [
            ExtensionType::Uuid,
            ExtensionType::FixedChar(3),
            ExtensionType::VarChar(42),
        ] {
            let field = ext.field("x", true);
            assert_eq!(ExtensionType::from_field(&field), Some(ext));
        }
    }

    #[test]
    fn test_plain_field_is_not_extension() {
        let field = Field::new("x", DataType::Utf8, true);
        assert_eq!(ExtensionType::from_field(&field), None);
    }
}
