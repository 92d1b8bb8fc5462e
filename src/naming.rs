//! Logical field name to physical column name resolution.
//!
//! Every destructive DDL decision in the engine goes through
//! [`columns_collide`]: a column is only dropped once no remaining field
//! resolves to it.

use serde::{Deserialize, Serialize};

use crate::schema::Field;

/// How logical field names become column names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingMode {
    /// Column name equals the field name
    #[default]
    Verbatim,
    /// camelCase and mixed names become lower snake_case
    Normalized,
}

impl NamingMode {
    pub fn from_underscored(underscored: bool) -> Self {
        if underscored {
            Self::Normalized
        } else {
            Self::Verbatim
        }
    }
}

/// Converts `createdAt`, `HTTPServer`, `date-a` into `created_at`, `http_server`, `date_a`.
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c == '-' || c == '.' || c.is_whitespace() {
            if !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).map_or(false, |n| n.is_lowercase());
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_is_lower);
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }
    out
}

/// Resolves a logical name under a naming mode.
pub fn resolve_column(mode: NamingMode, field_name: &str) -> String {
    match mode {
        NamingMode::Verbatim => field_name.to_string(),
        NamingMode::Normalized => snake_case(field_name),
    }
}

/// Physical column of a field: the explicit override wins, otherwise the
/// resolved logical name.
pub fn field_column(mode: NamingMode, field: &Field) -> String {
    match field.column.as_deref() {
        Some(column) => column.to_string(),
        None => resolve_column(mode, &field.name),
    }
}

/// True when both fields end up on the same physical column.
pub fn columns_collide(mode: NamingMode, a: &Field, b: &Field) -> bool {
    field_column(mode, a) == field_column(mode, b)
}
