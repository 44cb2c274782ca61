//! Predicate to SQLite `WHERE` clause translation.
//!
//! # Invariants
//! - Translation never touches storage; failures surface as
//!   `RepoError::UnsupportedQuery` before any statement is prepared.
//! - Literal values are always bound as parameters, never inlined.

use crate::query::{Predicate, QueryValue};
use crate::repo::{RepoError, RepoResult};
use rusqlite::types::Value;

/// Where a queryable property lives in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterTarget {
    /// Column on the entity's own table.
    Column(&'static str),
    /// Column on a child table; `subquery` must already correlate with the
    /// entity row and end in a `WHERE` clause the comparison can extend.
    Exists {
        subquery: &'static str,
        column: &'static str,
    },
}

/// Maps entity property names to storage targets.
pub trait PropertyMap {
    fn filter_target(&self, property: &str) -> Option<FilterTarget>;
}

/// Storage-native filter produced from a predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFilter {
    pub clause: String,
    pub params: Vec<Value>,
}

impl SqlFilter {
    pub fn match_all() -> Self {
        Self {
            clause: "1 = 1".to_string(),
            params: Vec::new(),
        }
    }
}

/// Translates an optional predicate into a `WHERE` clause body.
///
/// # Errors
/// - Unknown properties, empty `AND`/`OR` groups, and filters binding more
///   than `max_parameters` values are `UnsupportedQuery`.
pub fn translate(
    predicate: Option<&Predicate>,
    map: &dyn PropertyMap,
    max_parameters: usize,
) -> RepoResult<SqlFilter> {
    let Some(predicate) = predicate else {
        return Ok(SqlFilter::match_all());
    };

    let mut params = Vec::new();
    let clause = translate_node(predicate, map, &mut params)?;
    if params.len() > max_parameters {
        return Err(RepoError::UnsupportedQuery(format!(
            "query binds {} values; limit is {max_parameters}",
            params.len()
        )));
    }

    Ok(SqlFilter { clause, params })
}

fn translate_node(
    predicate: &Predicate,
    map: &dyn PropertyMap,
    params: &mut Vec<Value>,
) -> RepoResult<String> {
    match predicate {
        Predicate::Eq { property, value } => {
            let target = resolve(map, property)?;
            params.push(bind_value(value));
            Ok(compare(target, "= ?"))
        }
        Predicate::In { property, values } => {
            let target = resolve(map, property)?;
            if values.is_empty() {
                return Ok("0 = 1".to_string());
            }
            params.extend(values.iter().map(bind_value));
            let placeholders = vec!["?"; values.len()].join(", ");
            Ok(compare(target, &format!("IN ({placeholders})")))
        }
        Predicate::And(items) => translate_group("AND", items, map, params),
        Predicate::Or(items) => translate_group("OR", items, map, params),
        Predicate::Not(inner) => Ok(format!("NOT ({})", translate_node(inner, map, params)?)),
    }
}

fn translate_group(
    joiner: &str,
    items: &[Predicate],
    map: &dyn PropertyMap,
    params: &mut Vec<Value>,
) -> RepoResult<String> {
    if items.is_empty() {
        return Err(RepoError::UnsupportedQuery(format!(
            "empty {joiner} group has no defined meaning"
        )));
    }

    let parts = items
        .iter()
        .map(|item| translate_node(item, map, params))
        .collect::<RepoResult<Vec<_>>>()?;
    Ok(format!("({})", parts.join(&format!(" {joiner} "))))
}

fn resolve(map: &dyn PropertyMap, property: &str) -> RepoResult<FilterTarget> {
    map.filter_target(property).ok_or_else(|| {
        RepoError::UnsupportedQuery(format!("property `{property}` is not queryable"))
    })
}

fn compare(target: FilterTarget, comparison: &str) -> String {
    match target {
        FilterTarget::Column(column) => format!("{column} {comparison}"),
        FilterTarget::Exists { subquery, column } => {
            format!("EXISTS ({subquery} AND {column} {comparison})")
        }
    }
}

fn bind_value(value: &QueryValue) -> Value {
    match value {
        QueryValue::Integer(value) => Value::Integer(*value),
        QueryValue::Text(value) => Value::Text(value.clone()),
    }
}
