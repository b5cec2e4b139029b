//! Shared fixture for the loader integration tests
//!
//! A small practice-management domain: customers with contacts and a
//! practice, and pets owned by customers.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use ob_etl::memory::{InMemoryArchetypeService, InMemoryEtlLogDao, InMemoryLookupService};
use ob_etl::{ArchetypeDescriptor, ArchetypeService, LegacyRow, Loader, MappingSet, ObjectRef, Value};

pub const CUSTOMER: &str = "party.customerperson";
pub const PET: &str = "patient.pet";
pub const PRACTICE: &str = "party.organisationPractice";
pub const PHONE: &str = "contact.phoneNumber";
pub const LOCATION: &str = "contact.location";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Harness {
    pub service: Arc<InMemoryArchetypeService>,
    pub dao: Arc<InMemoryEtlLogDao>,
    pub lookups: Arc<InMemoryLookupService>,
    /// Contact every new customer starts with
    pub default_contact: ObjectRef,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        let service = Arc::new(InMemoryArchetypeService::with_descriptors([
            ArchetypeDescriptor::new("party.person")
                .text("firstName")
                .text("lastName"),
            ArchetypeDescriptor::new(PHONE).text("telephoneNumber"),
            ArchetypeDescriptor::new(LOCATION).text("address"),
            ArchetypeDescriptor::new(PRACTICE).required_text("name"),
            ArchetypeDescriptor::new(PET)
                .required_text("name")
                .lookup("species", "lookup.species")
                .reference("owner"),
        ]));

        let mut default_location = service.create(LOCATION).unwrap();
        default_location.set("address", Value::Text("unknown".into()));
        let default_contact = default_location.reference().clone();
        service.save(&[default_location]).unwrap();

        service.register(
            ArchetypeDescriptor::new(CUSTOMER)
                .text("legacyId")
                .text("firstName")
                .required_text("lastName")
                .lookup("title", "lookup.personTitle")
                .collection("contacts")
                .reference("practice")
                .default_value(
                    "contacts",
                    Value::Collection(vec![default_contact.clone()]),
                ),
        );

        Self {
            service,
            dao: Arc::new(InMemoryEtlLogDao::new()),
            lookups: Arc::new(InMemoryLookupService::new()),
            default_contact,
        }
    }

    pub fn loader(&self, name: &str, mappings: &MappingSet) -> Loader {
        Loader::new(
            name,
            mappings,
            self.service.clone(),
            self.dao.clone(),
            self.lookups.clone(),
        )
        .unwrap()
    }

    /// Save a practice directly, as if loaded by an earlier migration
    pub fn practice(&self, name: &str) -> ObjectRef {
        let mut practice = self.service.create(PRACTICE).unwrap();
        practice.set("name", Value::Text(name.into()));
        let reference = practice.reference().clone();
        self.service.save(&[practice]).unwrap();
        reference
    }
}

pub fn row(row_id: &str, values: &[(&str, Option<&str>)]) -> LegacyRow {
    LegacyRow::new(row_id, columns(values))
}

pub fn columns(values: &[(&str, Option<&str>)]) -> BTreeMap<String, Option<String>> {
    values
        .iter()
        .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
        .collect()
}
