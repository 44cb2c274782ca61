//! Storage-agnostic query algebra.
//!
//! # Responsibility
//! - Let callers describe filters over named entity properties.
//! - Keep SQL out of caller code; repositories translate predicates.
//!
//! # Invariants
//! - A predicate's `Display` output is deterministic and doubles as its cache
//!   fingerprint.
//! - A query without predicate matches every entity of its type.

use crate::model::entity::Entity;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use std::marker::PhantomData;

pub mod translate;

/// Literal compared against an entity property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
    Integer(i64),
    Text(String),
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for QueryValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl Display for QueryValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value:?}"),
        }
    }
}

/// Predicate tree over entity properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Eq {
        property: String,
        value: QueryValue,
    },
    In {
        property: String,
        values: Vec<QueryValue>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(property: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        Self::Eq {
            property: property.into(),
            value: value.into(),
        }
    }

    pub fn is_in<I, V>(property: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<QueryValue>,
    {
        Self::In {
            property: property.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Conjunction; nested `And` groups are flattened.
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Self::And(mut items) => {
                items.push(other);
                Self::And(items)
            }
            first => Self::And(vec![first, other]),
        }
    }

    /// Disjunction; nested `Or` groups are flattened.
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Self::Or(mut items) => {
                items.push(other);
                Self::Or(items)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Eq { property, value } => write!(f, "{property} = {value}"),
            Self::In { property, values } => {
                write!(f, "{property} IN [")?;
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
            Self::And(items) => write_group(f, "AND", items),
            Self::Or(items) => write_group(f, "OR", items),
            Self::Not(inner) => write!(f, "NOT ({inner})"),
        }
    }
}

fn write_group(f: &mut Formatter<'_>, joiner: &str, items: &[Predicate]) -> std::fmt::Result {
    write!(f, "(")?;
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            write!(f, " {joiner} ")?;
        }
        write!(f, "{item}")?;
    }
    write!(f, ")")
}

/// Typed query over entities of type `E`.
pub struct Query<E> {
    predicate: Option<Predicate>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Query<E> {
    /// Matches every entity of the type.
    pub fn all() -> Self {
        Self {
            predicate: None,
            _entity: PhantomData,
        }
    }

    /// Adds a filter; repeated calls are combined with `AND`.
    pub fn filter(self, predicate: Predicate) -> Self {
        let predicate = match self.predicate {
            Some(existing) => existing.and(predicate),
            None => predicate,
        };
        Self {
            predicate: Some(predicate),
            _entity: PhantomData,
        }
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    /// Stable text identifying this query's result set.
    pub fn fingerprint(&self) -> String {
        match &self.predicate {
            Some(predicate) => predicate.to_string(),
            None => "*".to_string(),
        }
    }
}

impl<E> Clone for Query<E> {
    fn clone(&self) -> Self {
        Self {
            predicate: self.predicate.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E> Debug for Query<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("predicate", &self.predicate)
            .finish()
    }
}
