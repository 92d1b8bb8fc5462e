use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;
use crate::schema::DataType;

/// Database engines the storage layer speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Postgres,
    #[serde(alias = "mariadb")]
    MySql,
    Sqlite,
}

/// Logical types offered for a native type, most likely first.
pub type LogicalTypes = &'static [&'static str];

const STRING_TYPES: LogicalTypes = &["string", "uid", "text"];
const TEXT_TYPES: LogicalTypes = &["text", "string"];
const INTEGER_TYPES: LogicalTypes = &["integer", "bigInt", "sort"];
const BIGINT_TYPES: LogicalTypes = &["bigInt", "integer", "sort"];
const FLOAT_TYPES: LogicalTypes = &["float", "double"];
const DOUBLE_TYPES: LogicalTypes = &["double", "float"];
const DECIMAL_TYPES: LogicalTypes = &["decimal", "double"];
const BOOLEAN_TYPES: LogicalTypes = &["boolean"];
const DATE_TYPES: LogicalTypes = &["date"];
const TIME_TYPES: LogicalTypes = &["time"];
const JSON_TYPES: LogicalTypes = &["json", "array"];
const UUID_TYPES: LogicalTypes = &["uuid", "string"];

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
        }
    }

    /// Strict engines report a concrete type for every view column.
    pub fn is_strict(&self) -> bool {
        !matches!(self, Self::Sqlite)
    }

    pub fn reports_view_column_types(&self) -> bool {
        self.is_strict()
    }

    /// Only postgres places tables in named schemas.
    pub fn supports_schemas(&self) -> bool {
        matches!(self, Self::Postgres)
    }

    pub fn native_type(&self, data_type: DataType) -> &'static str {
        match (self, data_type) {
            (Self::Postgres, DataType::String) => "character varying(255)",
            (Self::Postgres, DataType::Text) => "text",
            (Self::Postgres, DataType::Integer) => "integer",
            (Self::Postgres, DataType::BigInt) => "bigint",
            (Self::Postgres, DataType::Float) => "real",
            (Self::Postgres, DataType::Double) => "double precision",
            (Self::Postgres, DataType::Decimal) => "numeric",
            (Self::Postgres, DataType::Boolean) => "boolean",
            (Self::Postgres, DataType::Date) => "timestamp with time zone",
            (Self::Postgres, DataType::Time) => "time without time zone",
            (Self::Postgres, DataType::Json) => "json",
            (Self::Postgres, DataType::Uuid) => "uuid",

            (Self::MySql, DataType::String) => "varchar(255)",
            (Self::MySql, DataType::Text) => "text",
            (Self::MySql, DataType::Integer) => "int",
            (Self::MySql, DataType::BigInt) => "bigint",
            (Self::MySql, DataType::Float) => "float",
            (Self::MySql, DataType::Double) => "double",
            (Self::MySql, DataType::Decimal) => "decimal",
            (Self::MySql, DataType::Boolean) => "tinyint(1)",
            (Self::MySql, DataType::Date) => "datetime",
            (Self::MySql, DataType::Time) => "time",
            (Self::MySql, DataType::Json) => "json",
            (Self::MySql, DataType::Uuid) => "char(36)",

            (Self::Sqlite, DataType::String) => "VARCHAR(255)",
            (Self::Sqlite, DataType::Text) => "TEXT",
            (Self::Sqlite, DataType::Integer) => "INTEGER",
            (Self::Sqlite, DataType::BigInt) => "BIGINT",
            (Self::Sqlite, DataType::Float) => "FLOAT",
            (Self::Sqlite, DataType::Double) => "DOUBLE PRECISION",
            (Self::Sqlite, DataType::Decimal) => "DECIMAL",
            (Self::Sqlite, DataType::Boolean) => "TINYINT(1)",
            (Self::Sqlite, DataType::Date) => "DATETIME",
            (Self::Sqlite, DataType::Time) => "TIME",
            (Self::Sqlite, DataType::Json) => "JSON",
            (Self::Sqlite, DataType::Uuid) => "UUID",
        }
    }

    /// Native type reported for a recursive integer series column.
    pub fn series_native_type(&self) -> &'static str {
        match self {
            Self::Postgres => "integer",
            Self::MySql => "bigint",
            Self::Sqlite => "INTEGER",
        }
    }

    /// Fixed native-to-logical table. `None` for native types the table does
    /// not know.
    pub fn logical_types(&self, native_type: &str) -> Option<LogicalTypes> {
        let lowered = native_type.trim().to_lowercase();
        let base = lowered
            .split_once('(')
            .map(|(head, tail)| {
                // tinyint(1) is the mysql boolean; other lengths are dropped
                if head == "tinyint" && tail.starts_with("1)") {
                    "tinyint(1)"
                } else {
                    head
                }
            })
            .unwrap_or(lowered.as_str())
            .trim();

        let types = match base {
            "character varying" | "varchar" | "char" | "character" => STRING_TYPES,
            "text" | "mediumtext" | "longtext" => TEXT_TYPES,
            "integer" | "int" | "int4" | "smallint" | "mediumint" => INTEGER_TYPES,
            "bigint" | "int8" => BIGINT_TYPES,
            "real" | "float" | "float4" => FLOAT_TYPES,
            "double precision" | "double" | "float8" => DOUBLE_TYPES,
            "numeric" | "decimal" => DECIMAL_TYPES,
            "boolean" | "bool" | "tinyint(1)" => BOOLEAN_TYPES,
            "timestamp with time zone" | "timestamp without time zone" | "timestamp"
            | "timestamptz" | "datetime" | "date" => DATE_TYPES,
            "time" | "time without time zone" | "time with time zone" => TIME_TYPES,
            "json" | "jsonb" => JSON_TYPES,
            "uuid" => UUID_TYPES,
            _ => return None,
        };
        Some(types)
    }

    pub fn quote_identifier(&self, identifier: &str) -> String {
        match self {
            Self::MySql => format!("`{}`", identifier.replace('`', "``")),
            Self::Postgres | Self::Sqlite => format!("\"{}\"", identifier.replace('"', "\"\"")),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySql),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(SyncError::Config(format!("Unknown dialect: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_type_per_dialect() {
        let first = |d: Dialect| d.logical_types(d.series_native_type()).map(|t| t[0]);
        assert_eq!(first(Dialect::Postgres), Some("integer"));
        assert_eq!(first(Dialect::MySql), Some("bigInt"));
    }

    #[test]
    fn test_json_maps_to_several_logical_types() {
        assert_eq!(Dialect::Postgres.logical_types("json"), Some(JSON_TYPES));
        assert_eq!(Dialect::MySql.logical_types("JSON"), Some(JSON_TYPES));
    }

    #[test]
    fn test_length_suffixes_are_ignored() {
        assert_eq!(Dialect::MySql.logical_types("varchar(255)"), Some(STRING_TYPES));
        assert_eq!(Dialect::MySql.logical_types("tinyint(1)"), Some(BOOLEAN_TYPES));
        assert_eq!(Dialect::Postgres.logical_types("geometry"), None);
    }

    #[test]
    fn test_every_native_type_maps_back() {
        for dialect in [Dialect::Postgres, Dialect::MySql, Dialect::Sqlite] {
            for data_type in [
                DataType::String,
                DataType::Text,
                DataType::Integer,
                DataType::BigInt,
                DataType::Float,
                DataType::Double,
                DataType::Decimal,
                DataType::Boolean,
                DataType::Date,
                DataType::Time,
                DataType::Json,
                DataType::Uuid,
            ] {
                let types = dialect.logical_types(dialect.native_type(data_type));
                assert!(types.is_some(), "{} {}", dialect, data_type);
            }
        }
    }

    #[test]
    fn test_parse_dialect() {
        assert_eq!("PostgreSQL".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert!("oracle".parse::<Dialect>().is_err());
    }
}
