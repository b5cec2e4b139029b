//! In-memory collaborators
//!
//! Non-durable implementations of [`ArchetypeService`], [`EtlLogDao`] and
//! [`LookupService`] for tests and dry runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{DaoError, ServiceError};
use crate::etl_log::{EtlLog, EtlLogDao};
use crate::lookup::LookupService;
use crate::model::{IMObject, ObjectRef, Value};
use crate::service::{ArchetypeDescriptor, ArchetypeService, MemberDescriptor};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Archetype service
// ============================================================================

/// Descriptor-validated object store
#[derive(Default)]
pub struct InMemoryArchetypeService {
    descriptors: RwLock<HashMap<String, ArchetypeDescriptor>>,
    objects: RwLock<HashMap<ObjectRef, IMObject>>,
    save_calls: AtomicUsize,
}

impl InMemoryArchetypeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_descriptors(descriptors: impl IntoIterator<Item = ArchetypeDescriptor>) -> Self {
        let service = Self::new();
        for descriptor in descriptors {
            service.register(descriptor);
        }
        service
    }

    pub fn register(&self, descriptor: ArchetypeDescriptor) {
        write(&self.descriptors).insert(descriptor.archetype.clone(), descriptor);
    }

    /// Number of calls to `save`, successful or not
    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    /// Saved objects of `archetype`
    pub fn objects(&self, archetype: &str) -> Vec<IMObject> {
        read(&self.objects)
            .values()
            .filter(|o| o.archetype() == archetype)
            .cloned()
            .collect()
    }

    fn validate(&self, objects: &[IMObject]) -> Result<(), ServiceError> {
        let descriptors = read(&self.descriptors);
        let stored = read(&self.objects);
        let saving: HashSet<&ObjectRef> = objects.iter().map(IMObject::reference).collect();

        for object in objects {
            let descriptor = descriptors
                .get(object.archetype())
                .ok_or_else(|| ServiceError::ArchetypeNotFound(object.archetype().to_string()))?;

            let mut errors = descriptor.validate(object);
            for (name, value) in object.members() {
                let targets: &[ObjectRef] = match value {
                    Value::Reference(target) => std::slice::from_ref(target),
                    Value::Collection(targets) => targets.as_slice(),
                    _ => &[],
                };
                for target in targets {
                    if !saving.contains(target) && !stored.contains_key(target) {
                        errors.push(format!("{} refers to unsaved object {}", name, target));
                    }
                }
            }

            if !errors.is_empty() {
                return Err(ServiceError::Validation {
                    archetype: object.archetype().to_string(),
                    errors,
                });
            }
        }
        Ok(())
    }
}

impl ArchetypeService for InMemoryArchetypeService {
    fn create(&self, archetype: &str) -> Result<IMObject, ServiceError> {
        let descriptors = read(&self.descriptors);
        let descriptor = descriptors
            .get(archetype)
            .ok_or_else(|| ServiceError::ArchetypeNotFound(archetype.to_string()))?;

        let mut object = IMObject::new(archetype);
        for (name, value) in &descriptor.defaults {
            object.set(name.clone(), value.clone());
        }
        Ok(object)
    }

    fn save(&self, objects: &[IMObject]) -> Result<(), ServiceError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        self.validate(objects)?;

        let mut stored = write(&self.objects);
        for object in objects {
            stored.insert(object.reference().clone(), object.clone());
        }
        Ok(())
    }

    fn get(&self, reference: &ObjectRef) -> Result<Option<IMObject>, ServiceError> {
        Ok(read(&self.objects).get(reference).cloned())
    }

    fn query(
        &self,
        archetype: &str,
        member: &str,
        value: &str,
        max_results: usize,
    ) -> Result<Vec<IMObject>, ServiceError> {
        if !read(&self.descriptors).contains_key(archetype) {
            return Err(ServiceError::ArchetypeNotFound(archetype.to_string()));
        }
        Ok(read(&self.objects)
            .values()
            .filter(|o| o.archetype() == archetype)
            .filter(|o| o.get(member).and_then(Value::as_text) == Some(value))
            .take(max_results)
            .cloned()
            .collect())
    }

    fn member(&self, archetype: &str, member: &str) -> Option<MemberDescriptor> {
        read(&self.descriptors)
            .get(archetype)
            .and_then(|d| d.member(member))
            .cloned()
    }
}

// ============================================================================
// ETL log store
// ============================================================================

#[derive(Default)]
pub struct InMemoryEtlLogDao {
    logs: RwLock<Vec<EtlLog>>,
    unavailable: AtomicBool,
}

impl InMemoryEtlLogDao {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail, as a lost database connection would
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn logs(&self) -> Vec<EtlLog> {
        read(&self.logs).clone()
    }

    fn check_available(&self) -> Result<(), DaoError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DaoError::Store("ETL log store unavailable".to_string()));
        }
        Ok(())
    }
}

impl EtlLogDao for InMemoryEtlLogDao {
    fn save(&self, logs: &[EtlLog]) -> Result<(), DaoError> {
        self.check_available()?;
        let mut stored = write(&self.logs);
        for log in logs {
            match stored.iter_mut().find(|existing| existing.same_key(log)) {
                Some(existing) => *existing = log.clone(),
                None => stored.push(log.clone()),
            }
        }
        Ok(())
    }

    fn get(
        &self,
        loader: Option<&str>,
        row_id: &str,
        archetype: Option<&str>,
    ) -> Result<Vec<EtlLog>, DaoError> {
        self.check_available()?;
        Ok(read(&self.logs)
            .iter()
            .filter(|log| log.row_id == row_id)
            .filter(|log| loader.map_or(true, |l| log.loader == l))
            .filter(|log| archetype.map_or(true, |a| log.archetype.as_deref() == Some(a)))
            .cloned()
            .collect())
    }

    fn processed(&self, loader: &str, row_id: &str) -> Result<bool, DaoError> {
        let logs = self.get(Some(loader), row_id, None)?;
        Ok(!logs.is_empty() && logs.iter().all(|log| log.errors.is_none()))
    }

    fn remove(&self, loader: &str, row_id: &str) -> Result<(), DaoError> {
        self.check_available()?;
        write(&self.logs).retain(|log| !(log.loader == loader && log.row_id == row_id));
        Ok(())
    }
}

// ============================================================================
// Lookup service
// ============================================================================

#[derive(Default)]
pub struct InMemoryLookupService {
    lookups: RwLock<HashMap<(String, String), ObjectRef>>,
    resolve_calls: AtomicUsize,
}

impl InMemoryLookupService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, lookup_type: &str, code: &str) -> ObjectRef {
        write(&self.lookups)
            .entry((lookup_type.to_string(), code.to_string()))
            .or_insert_with(|| ObjectRef::new(lookup_type))
            .clone()
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        read(&self.lookups).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LookupService for InMemoryLookupService {
    fn resolve(&self, lookup_type: &str, code: &str) -> Result<Option<ObjectRef>, ServiceError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        Ok(read(&self.lookups)
            .get(&(lookup_type.to_string(), code.to_string()))
            .cloned())
    }

    fn create(
        &self,
        lookup_type: &str,
        code: &str,
        lookup: &ObjectRef,
    ) -> Result<(), ServiceError> {
        write(&self.lookups)
            .entry((lookup_type.to_string(), code.to_string()))
            .or_insert_with(|| lookup.clone());
        Ok(())
    }
}
