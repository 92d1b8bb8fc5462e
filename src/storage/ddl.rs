//! Typed DDL statements and their dialect rendering.
//!
//! Statements are executed structurally by the storage engine; the rendered
//! SQL is what gets logged and what `list_views` reports as a view definition.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::constants::DEFAULT_NAMESPACE;
use crate::schema::DataType;

use super::dialect::Dialect;

/// A table or view qualified by its schema namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub namespace: String,
    pub name: String,
}

impl TableRef {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self {
            namespace: namespace.unwrap_or(DEFAULT_NAMESPACE).to_string(),
            name: name.to_string(),
        }
    }

    /// Key used for catalog entries and row trees.
    pub fn key(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    pub fn quoted(&self, dialect: Dialect) -> String {
        if dialect.supports_schemas() {
            format!(
                "{}.{}",
                dialect.quote_identifier(&self.namespace),
                dialect.quote_identifier(&self.name)
            )
        } else {
            dialect.quote_identifier(&self.name)
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub default: Option<Value>,
    pub unique: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
}

impl ColumnDefinition {
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            nullable: true,
            default: None,
            unique: false,
            primary_key: false,
            auto_increment: false,
        }
    }

    pub fn primary_key(name: &str) -> Self {
        Self {
            nullable: false,
            primary_key: true,
            auto_increment: true,
            ..Self::new(name, DataType::BigInt)
        }
    }

    fn render(&self, dialect: Dialect) -> String {
        let mut sql = format!(
            "{} {}",
            dialect.quote_identifier(&self.name),
            dialect.native_type(self.data_type)
        );
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
            if self.auto_increment {
                sql.push_str(match dialect {
                    Dialect::Postgres => " GENERATED BY DEFAULT AS IDENTITY",
                    Dialect::MySql => " AUTO_INCREMENT",
                    Dialect::Sqlite => " AUTOINCREMENT",
                });
            }
        } else if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if self.unique && !self.primary_key {
            sql.push_str(" UNIQUE");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&render_literal(default));
        }
        sql
    }
}

fn render_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

/// One projected column of a `SELECT ... FROM` view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewColumn {
    pub name: String,
    pub column: String,
}

/// Constant column of a single-row view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiteralColumn {
    pub name: String,
    pub value: Value,
    pub native_type: String,
}

/// The query a view is defined by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewQuery {
    /// `SELECT <columns> FROM <table>`; `None` selects every column
    Select {
        from: TableRef,
        columns: Option<Vec<ViewColumn>>,
    },
    /// Recursive integer series `start..=end` in a single column
    Series { column: String, start: i64, end: i64 },
    /// One row of constants
    Values { columns: Vec<LiteralColumn> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDefinition {
    pub view: TableRef,
    pub query: ViewQuery,
}

impl ViewDefinition {
    pub fn select_all(view: TableRef, from: TableRef) -> Self {
        Self {
            view,
            query: ViewQuery::Select {
                from,
                columns: None,
            },
        }
    }

    pub fn select(view: TableRef, from: TableRef, columns: &[(&str, &str)]) -> Self {
        let columns = columns
            .iter()
            .map(|(name, column)| ViewColumn {
                name: name.to_string(),
                column: column.to_string(),
            })
            .collect();
        Self {
            view,
            query: ViewQuery::Select {
                from,
                columns: Some(columns),
            },
        }
    }

    pub fn series(view: TableRef, column: &str, start: i64, end: i64) -> Self {
        Self {
            view,
            query: ViewQuery::Series {
                column: column.to_string(),
                start,
                end,
            },
        }
    }

    pub fn values(view: TableRef, columns: Vec<LiteralColumn>) -> Self {
        Self {
            view,
            query: ViewQuery::Values { columns },
        }
    }

    /// The `SELECT` body of the view in the given dialect.
    pub fn render_query(&self, dialect: Dialect) -> String {
        let q = |ident: &str| dialect.quote_identifier(ident);
        match &self.query {
            ViewQuery::Select { from, columns } => {
                let projection = match columns {
                    None => "*".to_string(),
                    Some(columns) => columns
                        .iter()
                        .map(|c| {
                            if c.name == c.column {
                                q(&c.column)
                            } else {
                                format!("{} AS {}", q(&c.column), q(&c.name))
                            }
                        })
                        .collect::<Vec<_>>()
                        .join(", "),
                };
                format!("SELECT {} FROM {}", projection, from.quoted(dialect))
            }
            ViewQuery::Series { column, start, end } => format!(
                "WITH RECURSIVE numbers({col}) AS (SELECT {start} UNION ALL SELECT {col} + 1 FROM numbers WHERE {col} < {end}) SELECT * FROM numbers",
                col = q(column),
                start = start,
                end = end
            ),
            ViewQuery::Values { columns } => {
                let projection = columns
                    .iter()
                    .map(|c| format!("{} AS {}", render_literal(&c.value), q(&c.name)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("SELECT {}", projection)
            }
        }
    }
}

/// Structured DDL the synchronizer and relationship manager emit.
#[derive(Debug, Clone, PartialEq)]
pub enum DdlStatement {
    CreateTable {
        table: TableRef,
        columns: Vec<ColumnDefinition>,
    },
    AddColumn {
        table: TableRef,
        column: ColumnDefinition,
    },
    DropColumn {
        table: TableRef,
        column: String,
    },
    RenameColumn {
        table: TableRef,
        from: String,
        to: String,
    },
    DropTable {
        table: TableRef,
    },
    CreateView(ViewDefinition),
    DropView {
        view: TableRef,
    },
}

impl DdlStatement {
    pub fn table(&self) -> &TableRef {
        match self {
            Self::CreateTable { table, .. }
            | Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::RenameColumn { table, .. }
            | Self::DropTable { table } => table,
            Self::CreateView(definition) => &definition.view,
            Self::DropView { view } => view,
        }
    }

    pub fn render(&self, dialect: Dialect) -> String {
        let q = |ident: &str| dialect.quote_identifier(ident);
        match self {
            Self::CreateTable { table, columns } => format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                table.quoted(dialect),
                columns
                    .iter()
                    .map(|c| c.render(dialect))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Self::AddColumn { table, column } => format!(
                "ALTER TABLE {} ADD COLUMN {}",
                table.quoted(dialect),
                column.render(dialect)
            ),
            Self::DropColumn { table, column } => format!(
                "ALTER TABLE {} DROP COLUMN {}",
                table.quoted(dialect),
                q(column)
            ),
            Self::RenameColumn { table, from, to } => format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                table.quoted(dialect),
                q(from),
                q(to)
            ),
            Self::DropTable { table } => format!("DROP TABLE IF EXISTS {}", table.quoted(dialect)),
            Self::CreateView(definition) => format!(
                "CREATE VIEW {} AS {}",
                definition.view.quoted(dialect),
                definition.render_query(dialect)
            ),
            Self::DropView { view } => format!("DROP VIEW IF EXISTS {}", view.quoted(dialect)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_create_table_per_dialect() {
        let stmt = DdlStatement::CreateTable {
            table: TableRef::new(None, "posts"),
            columns: vec![
                ColumnDefinition::primary_key("id"),
                ColumnDefinition {
                    unique: true,
                    ..ColumnDefinition::new("title", DataType::String)
                },
            ],
        };
        assert_eq!(
            stmt.render(Dialect::Postgres),
            "CREATE TABLE IF NOT EXISTS \"public\".\"posts\" (\"id\" bigint PRIMARY KEY GENERATED BY DEFAULT AS IDENTITY, \"title\" character varying(255) UNIQUE)"
        );
        assert_eq!(
            stmt.render(Dialect::MySql),
            "CREATE TABLE IF NOT EXISTS `posts` (`id` bigint PRIMARY KEY AUTO_INCREMENT, `title` varchar(255) UNIQUE)"
        );
    }

    #[test]
    fn test_render_add_column_with_default() {
        let stmt = DdlStatement::AddColumn {
            table: TableRef::new(Some("s1"), "tests"),
            column: ColumnDefinition {
                nullable: false,
                default: Some(json!("it's")),
                ..ColumnDefinition::new("status", DataType::String)
            },
        };
        assert_eq!(
            stmt.render(Dialect::Sqlite),
            "ALTER TABLE \"tests\" ADD COLUMN \"status\" VARCHAR(255) NOT NULL DEFAULT 'it''s'"
        );
    }

    #[test]
    fn test_render_view_queries() {
        let view = ViewDefinition::select(
            TableRef::new(None, "v_users"),
            TableRef::new(None, "users"),
            &[("id", "id"), ("label", "name")],
        );
        assert_eq!(
            view.render_query(Dialect::MySql),
            "SELECT `id`, `name` AS `label` FROM `users`"
        );
        let series = ViewDefinition::series(TableRef::new(None, "numbers"), "n", 1, 20);
        assert!(series
            .render_query(Dialect::Postgres)
            .starts_with("WITH RECURSIVE numbers(\"n\")"));
    }
}
