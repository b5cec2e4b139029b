//! Archetype service
//!
//! The loader never touches storage for domain objects directly. It creates,
//! saves and queries them exclusively through [`ArchetypeService`], which also
//! owns the archetype descriptors used for validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::model::{IMObject, ObjectRef, Value};

/// What a member of an archetype holds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberKind {
    Text,
    Reference,
    Collection,
    /// Coded value drawn from lookups of `lookup_type`
    Lookup { lookup_type: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDescriptor {
    pub name: String,
    pub kind: MemberKind,
    #[serde(default)]
    pub required: bool,
}

/// Shape of one archetype: its members and the values a new instance starts with
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchetypeDescriptor {
    pub archetype: String,
    #[serde(default)]
    pub members: BTreeMap<String, MemberDescriptor>,
    #[serde(default)]
    pub defaults: BTreeMap<String, Value>,
}

impl ArchetypeDescriptor {
    pub fn new(archetype: impl Into<String>) -> Self {
        Self {
            archetype: archetype.into(),
            members: BTreeMap::new(),
            defaults: BTreeMap::new(),
        }
    }

    fn with_member(mut self, name: &str, kind: MemberKind, required: bool) -> Self {
        self.members.insert(
            name.to_string(),
            MemberDescriptor {
                name: name.to_string(),
                kind,
                required,
            },
        );
        self
    }

    pub fn text(self, name: &str) -> Self {
        self.with_member(name, MemberKind::Text, false)
    }

    pub fn required_text(self, name: &str) -> Self {
        self.with_member(name, MemberKind::Text, true)
    }

    pub fn reference(self, name: &str) -> Self {
        self.with_member(name, MemberKind::Reference, false)
    }

    pub fn collection(self, name: &str) -> Self {
        self.with_member(name, MemberKind::Collection, false)
    }

    pub fn lookup(self, name: &str, lookup_type: &str) -> Self {
        self.with_member(
            name,
            MemberKind::Lookup {
                lookup_type: lookup_type.to_string(),
            },
            false,
        )
    }

    pub fn default_value(mut self, name: &str, value: Value) -> Self {
        self.defaults.insert(name.to_string(), value);
        self
    }

    pub fn member(&self, name: &str) -> Option<&MemberDescriptor> {
        self.members.get(name)
    }

    /// Check an object against this descriptor, collecting every violation
    pub fn validate(&self, object: &IMObject) -> Vec<String> {
        let mut errors = Vec::new();
        for (name, _) in object.members() {
            if !self.members.contains_key(name) {
                errors.push(format!("{} has no member '{}'", self.archetype, name));
            }
        }
        for descriptor in self.members.values().filter(|m| m.required) {
            let present = object
                .get(&descriptor.name)
                .map(|v| !v.is_null())
                .unwrap_or(false);
            if !present {
                errors.push(format!("{} is required", descriptor.name));
            }
        }
        errors
    }
}

/// Domain object service
pub trait ArchetypeService: Send + Sync {
    /// Create a new, unsaved instance with the archetype's default values
    fn create(&self, archetype: &str) -> Result<IMObject, ServiceError>;

    /// Save all objects atomically: either every object is stored or none is
    fn save(&self, objects: &[IMObject]) -> Result<(), ServiceError>;

    fn get(&self, reference: &ObjectRef) -> Result<Option<IMObject>, ServiceError>;

    /// Objects of `archetype` whose `member` has the text value `value`,
    /// returning at most `max_results`
    fn query(
        &self,
        archetype: &str,
        member: &str,
        value: &str,
        max_results: usize,
    ) -> Result<Vec<IMObject>, ServiceError>;

    /// Descriptor of `member` in `archetype`, if both exist
    fn member(&self, archetype: &str, member: &str) -> Option<MemberDescriptor>;
}
