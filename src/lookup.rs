//! Lookup resolution
//!
//! Coded members (species, titles, states...) hold a code drawn from a lookup
//! table. Legacy values are normalised to codes, resolved against the
//! [`LookupService`] and cached per lookup type for the rest of the run.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{EtlError, Result, ServiceError};
use crate::model::ObjectRef;

/// Lookup table service
pub trait LookupService: Send + Sync {
    fn resolve(
        &self,
        lookup_type: &str,
        code: &str,
    ) -> std::result::Result<Option<ObjectRef>, ServiceError>;

    /// Store a new lookup under the reference it was handed out with
    fn create(
        &self,
        lookup_type: &str,
        code: &str,
        lookup: &ObjectRef,
    ) -> std::result::Result<(), ServiceError>;
}

/// Normalise a legacy value to a lookup code: upper case, with every run of
/// non-alphanumeric characters collapsed to `_`
pub fn to_code(value: &str) -> String {
    let mut code = String::with_capacity(value.len());
    let mut pending_separator = false;
    for c in value.trim().chars() {
        if c.is_alphanumeric() {
            if pending_separator && !code.is_empty() {
                code.push('_');
            }
            pending_separator = false;
            code.extend(c.to_uppercase());
        } else {
            pending_separator = true;
        }
    }
    code
}

/// A lookup handed out by `resolve` but not yet stored
struct PendingLookup {
    lookup_type: String,
    code: String,
    lookup: ObjectRef,
}

pub struct LookupResolver {
    service: Arc<dyn LookupService>,
    /// lookup type -> code -> lookup
    cache: HashMap<String, HashMap<String, ObjectRef>>,
    /// Lookups created since the last flush, stored on the next one
    pending: Vec<PendingLookup>,
}

impl LookupResolver {
    pub fn new(service: Arc<dyn LookupService>) -> Self {
        Self {
            service,
            cache: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// Resolve `value` to a lookup of `lookup_type`. When `create` is set and
    /// no such code exists, a new lookup is handed out and stored on the next
    /// [`flush`](Self::flush). Returns the code and the lookup.
    pub fn resolve(
        &mut self,
        lookup_type: &str,
        value: &str,
        create: bool,
    ) -> Result<(String, ObjectRef)> {
        let code = to_code(value);
        if code.is_empty() {
            return Err(EtlError::LookupNotFound {
                lookup_type: lookup_type.to_string(),
                code: value.to_string(),
            });
        }
        if let Some(lookup) = self.cache.get(lookup_type).and_then(|c| c.get(&code)) {
            return Ok((code, lookup.clone()));
        }

        let lookup = match self.service.resolve(lookup_type, &code)? {
            Some(lookup) => lookup,
            None if create => {
                let lookup = ObjectRef::new(lookup_type);
                debug!("Created lookup {} {}", lookup_type, code);
                self.pending.push(PendingLookup {
                    lookup_type: lookup_type.to_string(),
                    code: code.clone(),
                    lookup: lookup.clone(),
                });
                lookup
            }
            None => {
                return Err(EtlError::LookupNotFound {
                    lookup_type: lookup_type.to_string(),
                    code,
                })
            }
        };

        self.cache
            .entry(lookup_type.to_string())
            .or_default()
            .insert(code.clone(), lookup.clone());
        Ok((code, lookup))
    }

    /// True if lookups were created since the last flush
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Store the lookups created since the previous flush, returning how
    /// many were stored. The cache is kept.
    pub fn flush(&mut self) -> Result<usize> {
        let pending = std::mem::take(&mut self.pending);
        for lookup in &pending {
            self.service
                .create(&lookup.lookup_type, &lookup.code, &lookup.lookup)?;
        }
        if !pending.is_empty() {
            info!("Stored {} newly created lookups", pending.len());
        }
        Ok(pending.len())
    }

    /// Forget the lookups created since the last flush
    pub fn discard(&mut self) {
        for lookup in std::mem::take(&mut self.pending) {
            debug!("Discarding lookup {} {}", lookup.lookup_type, lookup.code);
            if let Some(codes) = self.cache.get_mut(&lookup.lookup_type) {
                codes.remove(&lookup.code);
            }
        }
    }

    /// Drop the cache. Pending lookups are unaffected.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn cached(&self) -> usize {
        self.cache.values().map(HashMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLookupService;

    #[test]
    fn test_to_code() {
        assert_eq!(to_code("Canine"), "CANINE");
        assert_eq!(to_code("  Domestic short-hair "), "DOMESTIC_SHORT_HAIR");
        assert_eq!(to_code("DR."), "DR");
        assert_eq!(to_code("--"), "");
    }

    #[test]
    fn test_resolve_existing_is_cached() {
        let service = Arc::new(InMemoryLookupService::new());
        service.add("lookup.species", "CANINE");
        let mut resolver = LookupResolver::new(service.clone());

        let (code, first) = resolver.resolve("lookup.species", "canine", false).unwrap();
        assert_eq!(code, "CANINE");
        let (_, second) = resolver.resolve("lookup.species", "Canine", false).unwrap();
        assert_eq!(first, second);
        assert_eq!(service.resolve_calls(), 1);
        assert_eq!(resolver.cached(), 1);
    }

    #[test]
    fn test_missing_code_without_create() {
        let service = Arc::new(InMemoryLookupService::new());
        let mut resolver = LookupResolver::new(service);
        let err = resolver.resolve("lookup.species", "Feline", false).unwrap_err();
        assert_eq!(
            err,
            EtlError::LookupNotFound {
                lookup_type: "lookup.species".into(),
                code: "FELINE".into()
            }
        );
    }

    #[test]
    fn test_create_and_flush() {
        let service = Arc::new(InMemoryLookupService::new());
        let mut resolver = LookupResolver::new(service.clone());

        let (_, created) = resolver.resolve("lookup.species", "Feline", true).unwrap();
        assert!(resolver.has_pending());
        assert_eq!(service.resolve("lookup.species", "FELINE").unwrap(), None);

        let (_, again) = resolver.resolve("lookup.species", "feline", true).unwrap();
        assert_eq!(again, created);

        assert_eq!(resolver.flush().unwrap(), 1);
        assert!(!resolver.has_pending());
        assert_eq!(
            service.resolve("lookup.species", "FELINE").unwrap(),
            Some(created)
        );
        assert_eq!(resolver.cached(), 1);
    }

    #[test]
    fn test_discard_pending() {
        let service = Arc::new(InMemoryLookupService::new());
        service.add("lookup.species", "CANINE");
        let mut resolver = LookupResolver::new(service.clone());

        resolver.resolve("lookup.species", "Canine", false).unwrap();
        resolver.resolve("lookup.species", "Axolotl", true).unwrap();
        resolver.discard();

        assert!(!resolver.has_pending());
        assert_eq!(resolver.flush().unwrap(), 0);
        assert_eq!(resolver.cached(), 1);
        assert_eq!(service.len(), 1);
        assert!(resolver.resolve("lookup.species", "Axolotl", false).is_err());
    }
}
