//! Per-row object graph
//!
//! Objects built while mapping one row live in an arena keyed by their
//! structural [`ObjectPath`]. Collections are assembled separately, keyed by
//! owner path and member, and written back to their owners in index order
//! when the graph is taken apart.

use std::collections::{BTreeMap, HashMap};

use crate::error::Result;
use crate::model::{IMObject, ObjectRef, Value};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathStep {
    Root {
        archetype: String,
    },
    /// Object held by `member` (at `index`, for collections) of the parent
    Child {
        member: String,
        index: Option<usize>,
        archetype: String,
    },
}

/// Location of an object within a row's graph
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectPath {
    steps: Vec<PathStep>,
}

impl ObjectPath {
    pub fn root(archetype: &str) -> Self {
        Self {
            steps: vec![PathStep::Root {
                archetype: archetype.to_string(),
            }],
        }
    }

    pub fn child(&self, member: &str, index: Option<usize>, archetype: &str) -> Self {
        let mut steps = self.steps.clone();
        steps.push(PathStep::Child {
            member: member.to_string(),
            index,
            archetype: archetype.to_string(),
        });
        Self { steps }
    }
}

/// Handle to an object in the arena
pub type ObjectId = usize;

#[derive(Debug)]
struct Entry {
    object: IMObject,
    index: Option<usize>,
}

#[derive(Debug)]
struct CollectionSlots {
    owner: ObjectId,
    member: String,
    slots: BTreeMap<usize, ObjectRef>,
    remove_defaults: bool,
}

#[derive(Debug)]
pub struct ObjectGraph {
    row_id: String,
    entries: Vec<Entry>,
    paths: HashMap<ObjectPath, ObjectId>,
    collections: HashMap<(ObjectPath, String), CollectionSlots>,
    bindings: HashMap<String, ObjectId>,
}

impl ObjectGraph {
    pub fn new(row_id: impl Into<String>) -> Self {
        Self {
            row_id: row_id.into(),
            entries: Vec::new(),
            paths: HashMap::new(),
            collections: HashMap::new(),
            bindings: HashMap::new(),
        }
    }

    pub fn row_id(&self) -> &str {
        &self.row_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Object at `path`, created with `create` on first visit. `index` is the
    /// collection position the object occupies, recorded for provenance.
    pub fn get_or_create<F>(
        &mut self,
        path: &ObjectPath,
        index: Option<usize>,
        create: F,
    ) -> Result<ObjectId>
    where
        F: FnOnce() -> Result<IMObject>,
    {
        if let Some(&id) = self.paths.get(path) {
            return Ok(id);
        }
        let object = create()?;
        let id = self.entries.len();
        self.entries.push(Entry { object, index });
        self.paths.insert(path.clone(), id);
        Ok(id)
    }

    pub fn object(&self, id: ObjectId) -> &IMObject {
        &self.entries[id].object
    }

    pub fn object_mut(&mut self, id: ObjectId) -> &mut IMObject {
        &mut self.entries[id].object
    }

    /// Bind `name` to an object so later mappings of the row can refer to it
    pub fn bind(&mut self, name: &str, id: ObjectId) {
        self.bindings.insert(name.to_string(), id);
    }

    pub fn bound(&self, name: &str) -> Option<&ObjectRef> {
        self.bindings.get(name).map(|&id| self.object(id).reference())
    }

    /// References of this row's objects of `archetype`
    pub fn find(&self, archetype: &str) -> Vec<&ObjectRef> {
        self.entries
            .iter()
            .filter(|e| e.object.archetype() == archetype)
            .map(|e| e.object.reference())
            .collect()
    }

    /// Place `target` at `index` of the `member` collection of the object at
    /// `owner_path`
    pub fn insert(
        &mut self,
        owner: ObjectId,
        owner_path: &ObjectPath,
        member: &str,
        index: usize,
        target: ObjectRef,
        remove_defaults: bool,
    ) {
        let collection = self
            .collections
            .entry((owner_path.clone(), member.to_string()))
            .or_insert_with(|| CollectionSlots {
                owner,
                member: member.to_string(),
                slots: BTreeMap::new(),
                remove_defaults: false,
            });
        collection.remove_defaults |= remove_defaults;
        collection.slots.insert(index, target);
    }

    /// Write assembled collections back to their owners and release the
    /// objects in creation order, each with its collection index
    pub fn into_objects(mut self) -> Vec<(IMObject, Option<usize>)> {
        for collection in self.collections.into_values() {
            let owner = &mut self.entries[collection.owner].object;
            let mut refs = if collection.remove_defaults {
                Vec::new()
            } else {
                owner.collection(&collection.member)
            };
            for target in collection.slots.into_values() {
                if !refs.contains(&target) {
                    refs.push(target);
                }
            }
            owner.set(collection.member, Value::Collection(refs));
        }
        self.entries
            .into_iter()
            .map(|entry| (entry.object, entry.index))
            .collect()
    }
}
