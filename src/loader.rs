//! Row loader
//!
//! Drives one run over a stream of legacy rows: skip rows already loaded,
//! map the rest, and commit their objects. A row that fails to map is
//! rolled back and recorded in the ETL log; the run carries on. Only fatal
//! errors (bad configuration, an unavailable ETL log store) are returned.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::MappingSet;
use crate::error::Result;
use crate::etl_log::EtlLogDao;
use crate::handler::ObjectHandler;
use crate::lookup::{LookupResolver, LookupService};
use crate::mapper::RowMapper;
use crate::model::{IMObject, LegacyRow};
use crate::service::ArchetypeService;

/// Counters for one run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    /// Rows presented to the loader
    pub rows: usize,
    /// Rows skipped as already processed or already pending in this run
    pub skipped: usize,
    /// Rows that failed to map or save
    pub failed: usize,
    /// Objects mapped and committed
    pub objects: usize,
}

pub struct Loader {
    name: String,
    id_column: String,
    skip_processed: bool,
    dao: Arc<dyn EtlLogDao>,
    mapper: RowMapper,
    handler: ObjectHandler,
    lookups: LookupResolver,
    rows: usize,
    skipped: usize,
    unidentified: usize,
    objects: usize,
}

impl Loader {
    /// Build a loader named `name`. The name keys the ETL log, so re-running
    /// under the same name picks up where an earlier run left off.
    pub fn new(
        name: impl Into<String>,
        mappings: &MappingSet,
        service: Arc<dyn ArchetypeService>,
        dao: Arc<dyn EtlLogDao>,
        lookup_service: Arc<dyn LookupService>,
    ) -> Result<Self> {
        let name = name.into();
        let mapper = RowMapper::new(mappings, service.clone())?;
        let handler = ObjectHandler::new(
            name.clone(),
            mappings.effective_batch_size(),
            service,
            dao.clone(),
        );
        info!(
            "Created loader {} with {} mappings",
            name,
            mappings.mapping.len()
        );
        Ok(Self {
            name,
            id_column: mappings.id_column.clone(),
            skip_processed: mappings.skip_processed,
            dao,
            mapper,
            handler,
            lookups: LookupResolver::new(lookup_service),
            rows: 0,
            skipped: 0,
            unidentified: 0,
            objects: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Load one row, returning the objects it produced. Skipped and failed
    /// rows produce none.
    pub fn load(&mut self, row: &LegacyRow) -> Result<Vec<IMObject>> {
        self.rows += 1;
        if self.skip_processed && self.processed(row.row_id())? {
            debug!("Skipping processed row {}", row.row_id());
            self.skipped += 1;
            return Ok(Vec::new());
        }

        match self.process(row) {
            Ok(objects) => {
                self.objects += objects.len();
                Ok(objects)
            }
            Err(e) => {
                self.handler.rollback();
                self.lookups.discard();
                if e.is_fatal() {
                    return Err(e);
                }
                warn!("Failed to load row {}: {}", row.row_id(), e);
                self.handler.error(row.row_id(), &e)?;
                Ok(Vec::new())
            }
        }
    }

    /// Load a row given as raw columns, taking its id from the id column.
    /// A row without an id cannot be logged and is only counted.
    pub fn load_columns(
        &mut self,
        values: BTreeMap<String, Option<String>>,
    ) -> Result<Vec<IMObject>> {
        match LegacyRow::from_columns(&self.id_column, values) {
            Ok(row) => self.load(&row),
            Err(e) => {
                warn!("Rejected row: {}", e);
                self.rows += 1;
                self.unidentified += 1;
                Ok(Vec::new())
            }
        }
    }

    /// Loaded by an earlier run, or earlier in this one and awaiting save
    fn processed(&self, row_id: &str) -> Result<bool> {
        if self.handler.is_pending(row_id) {
            return Ok(true);
        }
        Ok(self.dao.processed(&self.name, row_id)?)
    }

    fn process(&mut self, row: &LegacyRow) -> Result<Vec<IMObject>> {
        let graph = self.mapper.map(row, &mut self.handler, &mut self.lookups)?;
        if self.lookups.has_pending() {
            self.lookups.flush()?;
        }

        let mut objects = Vec::with_capacity(graph.len());
        for (object, index) in graph.into_objects() {
            objects.push(object.clone());
            self.handler.add(row.row_id(), object, index);
        }
        self.handler.commit()?;
        Ok(objects)
    }

    pub fn stats(&self) -> LoadStats {
        LoadStats {
            rows: self.rows,
            skipped: self.skipped,
            failed: self.handler.failed_rows() + self.unidentified,
            objects: self.objects,
        }
    }

    /// Save anything still batched and release the run's working state
    pub fn close(&mut self) -> Result<LoadStats> {
        self.lookups.flush()?;
        self.lookups.clear();
        self.handler.end()?;
        let stats = self.stats();
        info!(
            "Loader {} finished: {} rows, {} skipped, {} failed, {} objects",
            self.name, stats.rows, stats.skipped, stats.failed, stats.objects
        );
        Ok(stats)
    }
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("name", &self.name)
            .field("id_column", &self.id_column)
            .field("stats", &self.stats())
            .finish()
    }
}
