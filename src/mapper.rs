//! Row mapper
//!
//! Applies every mapping of a [`MappingSet`] to one legacy row, in declaration
//! order, building the row's [`ObjectGraph`]. Each mapping walks its parsed
//! path from the root object to the leaf member, creating objects on first
//! visit and linking children into their parents.

use std::sync::Arc;

use tracing::debug;

use crate::config::{Mapping, MappingSet};
use crate::error::{EtlError, Result};
use crate::graph::{ObjectGraph, ObjectId, ObjectPath};
use crate::handler::ObjectHandler;
use crate::lookup::LookupResolver;
use crate::model::{LegacyRow, ObjectRef, Value};
use crate::path::{self, Node};
use crate::reference::{self, SymbolicReference};
use crate::service::{ArchetypeService, MemberKind};

/// A mapping together with its parsed target path
struct CompiledMapping {
    mapping: Mapping,
    node: Node,
}

pub struct RowMapper {
    mappings: Vec<CompiledMapping>,
    service: Arc<dyn ArchetypeService>,
}

impl RowMapper {
    /// Parse and check every target path. Any failure is a configuration error.
    pub fn new(mappings: &MappingSet, service: Arc<dyn ArchetypeService>) -> Result<Self> {
        let mut compiled = Vec::with_capacity(mappings.mapping.len());
        for mapping in &mappings.mapping {
            let node = path::parse_path(&mapping.target).map_err(|reason| {
                EtlError::InvalidMapping {
                    target: mapping.target.clone(),
                    reason,
                }
            })?;
            if node.leaf().is_collection() && !mapping.is_reference {
                return Err(EtlError::InvalidNode {
                    node: mapping.target.clone(),
                    reason: "collection member needs a nested target or isReference".to_string(),
                });
            }
            compiled.push(CompiledMapping {
                mapping: mapping.clone(),
                node,
            });
        }
        Ok(Self {
            mappings: compiled,
            service,
        })
    }

    /// Build the object graph for `row`. References are resolved through the
    /// handler; coded members through the lookup resolver.
    pub fn map(
        &self,
        row: &LegacyRow,
        handler: &mut ObjectHandler,
        lookups: &mut LookupResolver,
    ) -> Result<ObjectGraph> {
        let mut graph = ObjectGraph::new(row.row_id());
        for compiled in &self.mappings {
            let mapping = &compiled.mapping;
            let raw = row
                .get(&mapping.source)
                .ok_or_else(|| EtlError::MissingRowValue {
                    row_id: row.row_id().to_string(),
                    column: mapping.source.clone(),
                })?;
            if raw.is_none() && mapping.exclude_null {
                continue;
            }
            let value = mapping.apply_value(raw);

            let mut context = MappingContext {
                row,
                mapping,
                graph: &mut graph,
                handler: &mut *handler,
                lookups: &mut *lookups,
                service: self.service.as_ref(),
            };
            context.apply(&compiled.node, value)?;
        }
        debug!("Mapped row {} to {} objects", graph.row_id(), graph.len());
        Ok(graph)
    }
}

struct MappingContext<'a> {
    row: &'a LegacyRow,
    mapping: &'a Mapping,
    graph: &'a mut ObjectGraph,
    handler: &'a mut ObjectHandler,
    lookups: &'a mut LookupResolver,
    service: &'a dyn ArchetypeService,
}

impl MappingContext<'_> {
    fn apply(&mut self, root: &Node, value: Option<String>) -> Result<()> {
        let mut node = root;
        let mut path = ObjectPath::root(&root.archetype);
        let mut current = self.object_at(&path, None, &root.archetype)?;
        if let Some(field) = &root.field {
            self.graph.bind(field, current);
        }

        while let Some(child) = node.child() {
            let child_path = path.child(&node.name, node.index, &child.archetype);
            let child_id = self.object_at(&child_path, node.index, &child.archetype)?;
            let child_ref = self.graph.object(child_id).reference().clone();
            self.link(current, &path, node, child_ref);

            node = child;
            path = child_path;
            current = child_id;
        }

        if self.mapping.is_reference {
            let value = value.ok_or_else(|| EtlError::NullReference {
                row_id: self.row.row_id().to_string(),
                target: self.mapping.target.clone(),
            })?;
            let target = self.resolve_reference(&value)?;
            self.link(current, &path, node, target);
        } else {
            let value = self.leaf_value(node, value)?;
            self.graph.object_mut(current).set(node.name.clone(), value);
        }
        Ok(())
    }

    fn object_at(
        &mut self,
        path: &ObjectPath,
        index: Option<usize>,
        archetype: &str,
    ) -> Result<ObjectId> {
        let service = self.service;
        self.graph
            .get_or_create(path, index, || Ok(service.create(archetype)?))
    }

    /// Store `target` in `node`'s member of the object `owner`
    fn link(&mut self, owner: ObjectId, owner_path: &ObjectPath, node: &Node, target: ObjectRef) {
        match node.index {
            Some(index) => self.graph.insert(
                owner,
                owner_path,
                &node.name,
                index,
                target,
                self.mapping.remove_default_objects,
            ),
            None => self
                .graph
                .object_mut(owner)
                .set(node.name.clone(), Value::Reference(target)),
        }
    }

    fn leaf_value(&mut self, node: &Node, value: Option<String>) -> Result<Value> {
        let Some(value) = value else {
            return Ok(Value::Null);
        };
        match self.service.member(&node.archetype, &node.name) {
            Some(descriptor) => match descriptor.kind {
                MemberKind::Lookup { lookup_type } => {
                    let (code, lookup) = self.lookups.resolve(
                        &lookup_type,
                        &value,
                        self.mapping.create_lookup,
                    )?;
                    Ok(Value::Code { code, lookup })
                }
                MemberKind::Collection => Err(EtlError::InvalidNode {
                    node: self.mapping.target.clone(),
                    reason: format!("{} is a collection, not a value", node.name),
                }),
                MemberKind::Text | MemberKind::Reference => Ok(Value::Text(value)),
            },
            None => Ok(Value::Text(value)),
        }
    }

    /// Resolve a reference value: `$name` for an object bound earlier in this
    /// row, otherwise a symbolic reference
    fn resolve_reference(&mut self, value: &str) -> Result<ObjectRef> {
        if let Some(name) = value.strip_prefix('$') {
            return self
                .graph
                .bound(name)
                .cloned()
                .ok_or_else(|| EtlError::InvalidReference(value.to_string()));
        }

        let reference =
            reference::decode(value).ok_or_else(|| EtlError::InvalidReference(value.to_string()))?;
        if let SymbolicReference::Row { archetype, row_id } = &reference {
            if row_id == self.row.row_id() {
                match self.graph.find(archetype).as_slice() {
                    [target] => return Ok((*target).clone()),
                    [_, _, ..] => {
                        return Err(EtlError::RefResolvesMultipleObjects(reference.encode()))
                    }
                    [] => {}
                }
            }
        }
        self.handler.resolve(&reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryArchetypeService, InMemoryEtlLogDao, InMemoryLookupService};
    use crate::service::ArchetypeDescriptor;
    use std::collections::BTreeMap;

    struct Fixture {
        service: Arc<InMemoryArchetypeService>,
        lookup_service: Arc<InMemoryLookupService>,
        handler: ObjectHandler,
        lookups: LookupResolver,
    }

    fn fixture() -> Fixture {
        let service = Arc::new(InMemoryArchetypeService::with_descriptors([
            ArchetypeDescriptor::new("party.person")
                .text("firstName")
                .text("lastName")
                .lookup("title", "lookup.personTitle")
                .collection("contacts")
                .reference("vet"),
            ArchetypeDescriptor::new("contact.phone").text("number"),
            ArchetypeDescriptor::new("party.vet").text("name"),
        ]));
        let lookup_service = Arc::new(InMemoryLookupService::new());
        let dao = Arc::new(InMemoryEtlLogDao::new());
        let handler = ObjectHandler::new("test", 100, service.clone(), dao);
        let lookups = LookupResolver::new(lookup_service.clone());
        Fixture {
            service,
            lookup_service,
            handler,
            lookups,
        }
    }

    fn row(id: &str, values: &[(&str, Option<&str>)]) -> LegacyRow {
        let values: BTreeMap<String, Option<String>> = values
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect();
        LegacyRow::new(id, values)
    }

    fn mapper(f: &Fixture, mappings: MappingSet) -> Result<RowMapper> {
        RowMapper::new(&mappings, f.service.clone())
    }

    #[test]
    fn test_scalar_members_share_root() {
        let mut f = fixture();
        let mapper = mapper(
            &f,
            MappingSet::new("ID")
                .with_mapping(Mapping::new("FIRST", "<party.person>firstName"))
                .with_mapping(Mapping::new("LAST", "<party.person>lastName")),
        )
        .unwrap();

        let graph = mapper
            .map(
                &row("1", &[("FIRST", Some("Jane")), ("LAST", Some("Doe"))]),
                &mut f.handler,
                &mut f.lookups,
            )
            .unwrap();
        let objects = graph.into_objects();
        assert_eq!(objects.len(), 1);
        let (person, index) = &objects[0];
        assert_eq!(*index, None);
        assert_eq!(person.get("firstName").and_then(Value::as_text), Some("Jane"));
        assert_eq!(person.get("lastName").and_then(Value::as_text), Some("Doe"));
    }

    #[test]
    fn test_nested_collection() {
        let mut f = fixture();
        let mapper = mapper(
            &f,
            MappingSet::new("ID")
                .with_mapping(Mapping::new("HOME", "<party.person>contacts[0]<contact.phone>number"))
                .with_mapping(Mapping::new("WORK", "<party.person>contacts[1]<contact.phone>number")),
        )
        .unwrap();

        let graph = mapper
            .map(
                &row("1", &[("HOME", Some("555-1")), ("WORK", Some("555-2"))]),
                &mut f.handler,
                &mut f.lookups,
            )
            .unwrap();
        let objects = graph.into_objects();
        assert_eq!(objects.len(), 3);
        let person = &objects[0].0;
        let contacts = person.collection("contacts");
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0], *objects[1].0.reference());
        assert_eq!(objects[1].1, Some(0));
        assert_eq!(objects[2].1, Some(1));
    }

    #[test]
    fn test_exclude_null_and_null_value() {
        let mut f = fixture();
        let mapper = mapper(
            &f,
            MappingSet::new("ID")
                .with_mapping(Mapping::new("FIRST", "<party.person>firstName").exclude_null())
                .with_mapping(Mapping::new("LAST", "<party.person>lastName")),
        )
        .unwrap();

        let graph = mapper
            .map(
                &row("1", &[("FIRST", None), ("LAST", None)]),
                &mut f.handler,
                &mut f.lookups,
            )
            .unwrap();
        let objects = graph.into_objects();
        let person = &objects[0].0;
        assert_eq!(person.get("firstName"), None);
        assert_eq!(person.get("lastName"), Some(&Value::Null));
    }

    #[test]
    fn test_missing_column() {
        let mut f = fixture();
        let mapper = mapper(
            &f,
            MappingSet::new("ID").with_mapping(Mapping::new("FIRST", "<party.person>firstName")),
        )
        .unwrap();
        let err = mapper
            .map(&row("1", &[]), &mut f.handler, &mut f.lookups)
            .unwrap_err();
        assert_eq!(
            err,
            EtlError::MissingRowValue {
                row_id: "1".into(),
                column: "FIRST".into()
            }
        );
    }

    #[test]
    fn test_invalid_configuration() {
        let f = fixture();
        let err = mapper(
            &f,
            MappingSet::new("ID").with_mapping(Mapping::new("A", "party.person>firstName")),
        )
        .err()
        .unwrap();
        assert!(matches!(err, EtlError::InvalidMapping { .. }));

        let err = mapper(
            &f,
            MappingSet::new("ID").with_mapping(Mapping::new("A", "<party.person>contacts[0]")),
        )
        .err()
        .unwrap();
        assert!(matches!(err, EtlError::InvalidNode { .. }));

        assert!(mapper(
            &f,
            MappingSet::new("ID")
                .with_mapping(Mapping::new("A", "<party.person>contacts[0]").reference()),
        )
        .is_ok());
    }

    #[test]
    fn test_lookup_member() {
        let mut f = fixture();
        f.lookup_service.add("lookup.personTitle", "DR");
        let mapper = mapper(
            &f,
            MappingSet::new("ID")
                .with_mapping(Mapping::new("TITLE", "<party.person>title"))
                .with_mapping(Mapping::new("OTHER", "<party.person>title")),
        )
        .unwrap();

        let graph = mapper
            .map(
                &row("1", &[("TITLE", Some("Dr.")), ("OTHER", Some("Dr"))]),
                &mut f.handler,
                &mut f.lookups,
            )
            .unwrap();
        let objects = graph.into_objects();
        let person = &objects[0].0;
        assert_eq!(person.get("title").and_then(Value::as_text), Some("DR"));

        let err = mapper
            .map(
                &row("2", &[("TITLE", Some("Prof")), ("OTHER", Some("Prof"))]),
                &mut f.handler,
                &mut f.lookups,
            )
            .unwrap_err();
        assert!(matches!(err, EtlError::LookupNotFound { .. }));
    }

    #[test]
    fn test_field_binding_reference() {
        let mut f = fixture();
        let mapper = mapper(
            &f,
            MappingSet::new("ID")
                .with_mapping(Mapping::new("VET", "$vet<party.vet>name"))
                .with_mapping(Mapping::new("VET", "<party.person>vet").reference().value("$vet")),
        )
        .unwrap();

        let graph = mapper
            .map(&row("1", &[("VET", Some("Dr Who"))]), &mut f.handler, &mut f.lookups)
            .unwrap();
        let objects = graph.into_objects();
        let vet = objects[0].0.reference().clone();
        assert_eq!(objects[1].0.get("vet"), Some(&Value::Reference(vet)));
    }

    #[test]
    fn test_reference_errors() {
        let mut f = fixture();
        let mapper = mapper(
            &f,
            MappingSet::new("ID").with_mapping(Mapping::new("VET", "<party.person>vet").reference()),
        )
        .unwrap();

        let err = mapper
            .map(&row("1", &[("VET", None)]), &mut f.handler, &mut f.lookups)
            .unwrap_err();
        assert!(matches!(err, EtlError::NullReference { .. }));

        let err = mapper
            .map(&row("1", &[("VET", Some("garbage"))]), &mut f.handler, &mut f.lookups)
            .unwrap_err();
        assert_eq!(err, EtlError::InvalidReference("garbage".into()));

        let err = mapper
            .map(&row("1", &[("VET", Some("<party.vet>99"))]), &mut f.handler, &mut f.lookups)
            .unwrap_err();
        assert_eq!(err, EtlError::IMObjectNotFound("<party.vet>99".into()));
    }

    #[test]
    fn test_unknown_archetype() {
        let mut f = fixture();
        let mapper = mapper(
            &f,
            MappingSet::new("ID").with_mapping(Mapping::new("A", "<party.animal>name")),
        )
        .unwrap();
        let err = mapper
            .map(&row("1", &[("A", Some("Rex"))]), &mut f.handler, &mut f.lookups)
            .unwrap_err();
        assert_eq!(err, EtlError::ArchetypeNotFound("party.animal".into()));
    }
}
