use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage type of a physical column, independent of dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataType {
    String,
    Text,
    Integer,
    BigInt,
    Float,
    Double,
    Decimal,
    Boolean,
    Date,
    Time,
    Json,
    Uuid,
}

/// Groups of storage types that can hold each other's values without loss
/// of meaning. Two claimants of one column must share a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeFamily {
    Textual,
    Integral,
    Real,
    Boolean,
    Temporal,
    Json,
}

impl DataType {
    pub fn family(&self) -> TypeFamily {
        match self {
            Self::String | Self::Text | Self::Uuid => TypeFamily::Textual,
            Self::Integer | Self::BigInt => TypeFamily::Integral,
            Self::Float | Self::Double | Self::Decimal => TypeFamily::Real,
            Self::Boolean => TypeFamily::Boolean,
            Self::Date | Self::Time => TypeFamily::Temporal,
            Self::Json => TypeFamily::Json,
        }
    }

    pub fn is_compatible_with(&self, other: &DataType) -> bool {
        self.family() == other.family()
    }

    /// Logical field type name that stores values of this type by default.
    pub fn logical_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Text => "text",
            Self::Integer => "integer",
            Self::BigInt => "bigInt",
            Self::Float => "float",
            Self::Double => "double",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Time => "time",
            Self::Json => "json",
            Self::Uuid => "uuid",
        }
    }

    pub fn from_logical_name(name: &str) -> Option<Self> {
        let data_type = match name {
            "string" => Self::String,
            "text" => Self::Text,
            "integer" => Self::Integer,
            "bigInt" => Self::BigInt,
            "float" => Self::Float,
            "double" => Self::Double,
            "decimal" => Self::Decimal,
            "boolean" => Self::Boolean,
            "date" => Self::Date,
            "time" => Self::Time,
            "json" | "array" => Self::Json,
            "uuid" => Self::Uuid,
            _ => return None,
        };
        Some(data_type)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.logical_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_families() {
        assert!(DataType::Integer.is_compatible_with(&DataType::BigInt));
        assert!(DataType::String.is_compatible_with(&DataType::Text));
        assert!(!DataType::String.is_compatible_with(&DataType::Integer));
        assert!(!DataType::Date.is_compatible_with(&DataType::Json));
    }

    #[test]
    fn test_logical_names() {
        assert_eq!(DataType::from_logical_name("bigInt"), Some(DataType::BigInt));
        assert_eq!(DataType::from_logical_name("array"), Some(DataType::Json));
        assert_eq!(DataType::from_logical_name("belongsTo"), None);
    }
}
