//! Typed filter expressions for [`QueryRequest`](crate::QueryRequest).
//!
//! Adapters may translate a [`Filter`] into their own query language. The
//! [`Display`](std::fmt::Display) impl renders the bracketed field syntax used
//! by clinical data capture hosts, e.g. `[used_by] = '' AND [group] = '2'`,
//! which is also what audit events and logs show operators.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::types::is_empty_value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Filter {
    /// Matches every row.
    All,
    /// Field value equals `value` exactly.
    Equals { field: String, value: String },
    /// Field is unset or blank.
    Unset { field: String },
    /// Field holds a non-blank value.
    Present { field: String },
    /// Field value starts with `prefix` (plain string match).
    StartsWith { field: String, prefix: String },
    /// Every sub-filter matches.
    And(Vec<Filter>),
}

impl Filter {
    pub fn equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn unset(field: impl Into<String>) -> Self {
        Filter::Unset { field: field.into() }
    }

    pub fn present(field: impl Into<String>) -> Self {
        Filter::Present { field: field.into() }
    }

    pub fn starts_with(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Filter::StartsWith {
            field: field.into(),
            prefix: prefix.into(),
        }
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut parts) => {
                parts.push(other);
                Filter::And(parts)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    /// Evaluate the filter against one row's fields. Missing fields read as `""`.
    pub fn matches(&self, fields: &BTreeMap<String, String>) -> bool {
        let get = |field: &str| fields.get(field).map(String::as_str).unwrap_or("");
        match self {
            Filter::All => true,
            Filter::Equals { field, value } => get(field) == value,
            Filter::Unset { field } => is_empty_value(get(field)),
            Filter::Present { field } => !is_empty_value(get(field)),
            Filter::StartsWith { field, prefix } => get(field).starts_with(prefix.as_str()),
            Filter::And(parts) => parts.iter().all(|part| part.matches(fields)),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::All => f.write_str("true"),
            Filter::Equals { field, value } => write!(f, "[{field}] = '{value}'"),
            Filter::Unset { field } => write!(f, "[{field}] = ''"),
            Filter::Present { field } => write!(f, "[{field}] <> ''"),
            Filter::StartsWith { field, prefix } => write!(f, "starts_with([{field}],'{prefix}')"),
            Filter::And(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" AND ")?;
                    }
                    write!(f, "{part}")?;
                }
                Ok(())
            }
        }
    }
}
