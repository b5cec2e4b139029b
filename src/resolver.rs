//! Reference resolution against persisted state
//!
//! Row-id references are resolved through the ETL log, natural-key references
//! through a bounded archetype query. Hits are cached by their canonical
//! string for the rest of the run. Objects still in flight are resolved by
//! the [`ObjectHandler`](crate::handler::ObjectHandler) before reaching here.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{EtlError, Result};
use crate::etl_log::{EtlLog, EtlLogDao};
use crate::model::ObjectRef;
use crate::reference::SymbolicReference;
use crate::service::ArchetypeService;

/// At most two results are needed to tell "unique" from "ambiguous"
const NATURAL_KEY_LIMIT: usize = 2;

pub struct ReferenceResolver {
    loader: String,
    service: Arc<dyn ArchetypeService>,
    dao: Arc<dyn EtlLogDao>,
    cache: HashMap<String, ObjectRef>,
}

impl ReferenceResolver {
    pub fn new(
        loader: impl Into<String>,
        service: Arc<dyn ArchetypeService>,
        dao: Arc<dyn EtlLogDao>,
    ) -> Self {
        Self {
            loader: loader.into(),
            service,
            dao,
            cache: HashMap::new(),
        }
    }

    pub fn resolve(&mut self, reference: &SymbolicReference) -> Result<ObjectRef> {
        let key = reference.encode();
        if let Some(target) = self.cache.get(&key) {
            return Ok(target.clone());
        }

        let target = match reference {
            SymbolicReference::Row { archetype, row_id } => {
                self.resolve_row(&key, archetype, row_id)?
            }
            SymbolicReference::NaturalKey {
                archetype,
                member,
                value,
            } => self.resolve_natural_key(&key, archetype, member, value)?,
        };
        debug!("Resolved {} to {}", key, target);
        self.cache.insert(key, target.clone());
        Ok(target)
    }

    pub fn forget(&mut self, key: &str) {
        self.cache.remove(key);
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    fn resolve_row(&self, key: &str, archetype: &str, row_id: &str) -> Result<ObjectRef> {
        let mut logs = self.dao.get(None, row_id, Some(archetype))?;
        if logs.is_empty() {
            return Err(self.missing_row(key, row_id)?);
        }

        if logs.len() > 1 {
            let own: Vec<EtlLog> = logs
                .iter()
                .filter(|log| log.loader == self.loader)
                .cloned()
                .collect();
            if !own.is_empty() {
                logs = own;
            }
        }
        if logs.len() > 1 {
            return Err(EtlError::RefResolvesMultipleObjects(key.to_string()));
        }

        let log = &logs[0];
        match (&log.reference, &log.errors) {
            (Some(target), None) => Ok(target.clone()),
            (_, errors) => Err(EtlError::ReferencedObjectNotMapped {
                reference: key.to_string(),
                message: errors
                    .clone()
                    .unwrap_or_else(|| "object has not been saved".to_string()),
            }),
        }
    }

    /// Error for a row with no log of the requested archetype. A row that
    /// failed outright is reported as unmapped rather than missing.
    fn missing_row(&self, key: &str, row_id: &str) -> Result<EtlError> {
        let failure = self
            .dao
            .get(None, row_id, None)?
            .into_iter()
            .find(|log| log.archetype.is_none())
            .and_then(|log| log.errors);
        Ok(match failure {
            Some(message) => EtlError::ReferencedObjectNotMapped {
                reference: key.to_string(),
                message,
            },
            None => EtlError::IMObjectNotFound(key.to_string()),
        })
    }

    fn resolve_natural_key(
        &self,
        key: &str,
        archetype: &str,
        member: &str,
        value: &str,
    ) -> Result<ObjectRef> {
        let matches = self
            .service
            .query(archetype, member, value, NATURAL_KEY_LIMIT)?;
        match matches.as_slice() {
            [] => Err(EtlError::IMObjectNotFound(key.to_string())),
            [object] => Ok(object.reference().clone()),
            _ => Err(EtlError::RefResolvesMultipleObjects(key.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryArchetypeService, InMemoryEtlLogDao};
    use crate::model::Value;
    use crate::service::ArchetypeDescriptor;

    fn fixture() -> (Arc<InMemoryArchetypeService>, Arc<InMemoryEtlLogDao>) {
        let service = Arc::new(InMemoryArchetypeService::with_descriptors([
            ArchetypeDescriptor::new("party.person").text("lastName"),
        ]));
        (service, Arc::new(InMemoryEtlLogDao::new()))
    }

    fn saved_log(loader: &str, row_id: &str) -> (EtlLog, ObjectRef) {
        let target = ObjectRef::new("party.person");
        let mut log = EtlLog::new(loader, row_id, "party.person", None);
        log.succeeded(target.clone());
        (log, target)
    }

    #[test]
    fn test_row_reference_resolves_and_caches() {
        let (service, dao) = fixture();
        let (log, target) = saved_log("customers", "7");
        dao.save(&[log]).unwrap();

        let mut resolver = ReferenceResolver::new("customers", service, dao.clone());
        let reference = SymbolicReference::row("party.person", "7");
        assert_eq!(resolver.resolve(&reference).unwrap(), target);

        // cached: the store is no longer consulted
        dao.set_unavailable(true);
        assert_eq!(resolver.resolve(&reference).unwrap(), target);
    }

    #[test]
    fn test_row_reference_not_found() {
        let (service, dao) = fixture();
        let mut resolver = ReferenceResolver::new("customers", service, dao);
        let err = resolver
            .resolve(&SymbolicReference::row("party.person", "7"))
            .unwrap_err();
        assert_eq!(err, EtlError::IMObjectNotFound("<party.person>7".into()));
    }

    #[test]
    fn test_prefers_current_loader_when_ambiguous() {
        let (service, dao) = fixture();
        let (ours, target) = saved_log("customers", "7");
        let (theirs, _) = saved_log("patients", "7");
        dao.save(&[ours, theirs]).unwrap();

        let mut resolver = ReferenceResolver::new("customers", service.clone(), dao.clone());
        let reference = SymbolicReference::row("party.person", "7");
        assert_eq!(resolver.resolve(&reference).unwrap(), target);

        let mut other = ReferenceResolver::new("vets", service, dao);
        assert_eq!(
            other.resolve(&reference).unwrap_err(),
            EtlError::RefResolvesMultipleObjects("<party.person>7".into())
        );
    }

    #[test]
    fn test_failed_row_is_not_mapped() {
        let (service, dao) = fixture();
        let mut log = EtlLog::new("customers", "7", "party.person", None);
        log.failed("lastName is required");
        dao.save(&[log, EtlLog::row_error("customers", "8", "bad date")])
            .unwrap();

        let mut resolver = ReferenceResolver::new("customers", service, dao);
        assert_eq!(
            resolver
                .resolve(&SymbolicReference::row("party.person", "7"))
                .unwrap_err(),
            EtlError::ReferencedObjectNotMapped {
                reference: "<party.person>7".into(),
                message: "lastName is required".into(),
            }
        );
        assert!(matches!(
            resolver.resolve(&SymbolicReference::row("party.person", "8")),
            Err(EtlError::ReferencedObjectNotMapped { .. })
        ));
    }

    #[test]
    fn test_natural_key_resolution() {
        let (service, dao) = fixture();
        let mut smith = service.create("party.person").unwrap();
        smith.set("lastName", Value::Text("Smith".into()));
        let mut jones = service.create("party.person").unwrap();
        jones.set("lastName", Value::Text("Jones".into()));
        let mut other_jones = service.create("party.person").unwrap();
        other_jones.set("lastName", Value::Text("Jones".into()));
        service
            .save(&[smith.clone(), jones, other_jones])
            .unwrap();

        let mut resolver = ReferenceResolver::new("customers", service, dao);
        let unique = SymbolicReference::natural_key("party.person", "lastName", "Smith");
        assert_eq!(resolver.resolve(&unique).unwrap(), *smith.reference());

        let ambiguous = SymbolicReference::natural_key("party.person", "lastName", "Jones");
        assert_eq!(
            resolver.resolve(&ambiguous).unwrap_err(),
            EtlError::RefResolvesMultipleObjects("<party.person>lastName=Jones".into())
        );

        let missing = SymbolicReference::natural_key("party.person", "lastName", "Brown");
        assert!(matches!(
            resolver.resolve(&missing),
            Err(EtlError::IMObjectNotFound(_))
        ));
    }
}
