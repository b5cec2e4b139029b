//! Domain objects and legacy rows

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EtlError, Result};

/// Persistent identity of a domain object
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub archetype: String,
    pub id: Uuid,
}

impl ObjectRef {
    pub fn new(archetype: impl Into<String>) -> Self {
        Self {
            archetype: archetype.into(),
            id: Uuid::new_v4(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.archetype, self.id)
    }
}

/// Member value of a domain object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Text(String),
    /// Coded value resolved against a lookup
    Code { code: String, lookup: ObjectRef },
    Reference(ObjectRef),
    Collection(Vec<ObjectRef>),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Code { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&[ObjectRef]> {
        match self {
            Value::Collection(refs) => Some(refs),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// A dynamically typed domain object, shaped by its archetype
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IMObject {
    reference: ObjectRef,
    members: BTreeMap<String, Value>,
}

impl IMObject {
    pub fn new(archetype: impl Into<String>) -> Self {
        Self {
            reference: ObjectRef::new(archetype),
            members: BTreeMap::new(),
        }
    }

    pub fn reference(&self) -> &ObjectRef {
        &self.reference
    }

    pub fn archetype(&self) -> &str {
        &self.reference.archetype
    }

    pub fn get(&self, member: &str) -> Option<&Value> {
        self.members.get(member)
    }

    pub fn set(&mut self, member: impl Into<String>, value: Value) {
        self.members.insert(member.into(), value);
    }

    pub fn members(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.members.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Current collection contents of `member`, empty if unset
    pub fn collection(&self, member: &str) -> Vec<ObjectRef> {
        self.members
            .get(member)
            .and_then(Value::as_collection)
            .map(<[ObjectRef]>::to_vec)
            .unwrap_or_default()
    }
}

/// One legacy source record. Immutable once read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyRow {
    row_id: String,
    values: BTreeMap<String, Option<String>>,
}

impl LegacyRow {
    pub fn new(row_id: impl Into<String>, values: BTreeMap<String, Option<String>>) -> Self {
        Self {
            row_id: row_id.into(),
            values,
        }
    }

    /// Build a row whose id is taken from `id_column`
    pub fn from_columns(
        id_column: &str,
        values: BTreeMap<String, Option<String>>,
    ) -> Result<Self> {
        let row_id = values
            .get(id_column)
            .cloned()
            .flatten()
            .ok_or_else(|| EtlError::MissingRowValue {
                row_id: String::new(),
                column: id_column.to_string(),
            })?;
        Ok(Self::new(row_id, values))
    }

    pub fn row_id(&self) -> &str {
        &self.row_id
    }

    /// `None` if the column is absent, `Some(None)` if it is null
    pub fn get(&self, column: &str) -> Option<Option<&str>> {
        self.values.get(column).map(Option::as_deref)
    }
}
