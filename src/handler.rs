//! Object handler
//!
//! Objects move through three states:
//!
//! ```text
//!   add()            commit()          save()
//! ───────► Incomplete ───────► Batch ───────► Persisted
//!              │
//!              └── rollback() discards the row
//! ```
//!
//! The batch is partitioned into commit groups, one per source row. A batch
//! is first saved in one call; if the archetype service rejects it, each
//! group is retried on its own so that one bad row cannot sink the others.
//! Groups that still fail have their ETL logs rewritten with the error.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{EtlError, Result};
use crate::etl_log::{EtlLog, EtlLogDao};
use crate::model::{IMObject, ObjectRef};
use crate::reference::{encode_row, SymbolicReference};
use crate::resolver::ReferenceResolver;
use crate::service::ArchetypeService;

/// An object awaiting save, with its in-flight key and provenance
struct Pending {
    row_id: String,
    key: String,
    object: IMObject,
    log: EtlLog,
}

struct CommitGroup {
    row_id: String,
    pending: Vec<Pending>,
}

impl CommitGroup {
    fn objects(&self) -> Vec<IMObject> {
        self.pending.iter().map(|p| p.object.clone()).collect()
    }
}

pub struct ObjectHandler {
    loader: String,
    batch_size: usize,
    service: Arc<dyn ArchetypeService>,
    dao: Arc<dyn EtlLogDao>,
    resolver: ReferenceResolver,
    incomplete: Vec<Pending>,
    batch: Vec<CommitGroup>,
    /// `<archetype>rowId` -> objects not yet persisted
    in_flight: HashMap<String, Vec<ObjectRef>>,
    failed_rows: usize,
}

impl ObjectHandler {
    pub fn new(
        loader: impl Into<String>,
        batch_size: usize,
        service: Arc<dyn ArchetypeService>,
        dao: Arc<dyn EtlLogDao>,
    ) -> Self {
        let loader = loader.into();
        let resolver = ReferenceResolver::new(loader.clone(), service.clone(), dao.clone());
        Self {
            loader,
            batch_size: batch_size.max(1),
            service,
            dao,
            resolver,
            incomplete: Vec::new(),
            batch: Vec::new(),
            in_flight: HashMap::new(),
            failed_rows: 0,
        }
    }

    pub fn incomplete_len(&self) -> usize {
        self.incomplete.len()
    }

    /// Objects committed but not yet saved
    pub fn batch_len(&self) -> usize {
        self.batch.iter().map(|g| g.pending.len()).sum()
    }

    /// Rows whose objects failed to save
    pub fn failed_rows(&self) -> usize {
        self.failed_rows
    }

    /// Register an object produced by `row_id`
    pub fn add(&mut self, row_id: &str, object: IMObject, index: Option<usize>) {
        let key = encode_row(object.archetype(), row_id);
        self.in_flight
            .entry(key.clone())
            .or_default()
            .push(object.reference().clone());
        self.resolver.forget(&key);

        let log = EtlLog::new(&self.loader, row_id, object.archetype(), index);
        self.incomplete.push(Pending {
            row_id: row_id.to_string(),
            key,
            object,
            log,
        });
    }

    /// True if `row_id` has objects added or committed but not yet saved
    pub fn is_pending(&self, row_id: &str) -> bool {
        self.incomplete.iter().any(|p| p.row_id == row_id)
            || self.batch.iter().any(|g| g.row_id == row_id)
    }

    /// Move the incomplete objects into the batch, saving it once full. A row
    /// committed again replaces its earlier group.
    pub fn commit(&mut self) -> Result<()> {
        if self.incomplete.is_empty() {
            return Ok(());
        }

        let mut groups: Vec<CommitGroup> = Vec::new();
        for pending in mem::take(&mut self.incomplete) {
            if let Some(group) = groups.last_mut().filter(|g| g.row_id == pending.row_id) {
                group.pending.push(pending);
                continue;
            }
            groups.push(CommitGroup {
                row_id: pending.row_id.clone(),
                pending: vec![pending],
            });
        }

        for group in groups {
            self.discard(&group.row_id);
            // supersede logs left by an earlier attempt at this row
            self.dao.remove(&self.loader, &group.row_id)?;
            self.batch.push(group);
        }

        if self.batch_len() >= self.batch_size {
            self.save()?;
        }
        Ok(())
    }

    /// Discard the incomplete objects. Committed objects are untouched.
    pub fn rollback(&mut self) {
        for pending in mem::take(&mut self.incomplete) {
            debug!("Rolling back {} from row {}", pending.key, pending.row_id);
            self.release(&pending);
        }
    }

    /// Record a row that failed before any of its objects could be committed
    pub fn error(&mut self, row_id: &str, cause: &EtlError) -> Result<()> {
        self.discard(row_id);
        self.dao.remove(&self.loader, row_id)?;
        self.dao
            .save(&[EtlLog::row_error(&self.loader, row_id, cause.to_string())])?;
        self.failed_rows += 1;
        Ok(())
    }

    /// Resolve a reference, preferring objects that are not yet persisted
    pub fn resolve(&mut self, reference: &SymbolicReference) -> Result<ObjectRef> {
        if let SymbolicReference::Row { .. } = reference {
            let key = reference.encode();
            match self.in_flight.get(&key).map(Vec::as_slice) {
                Some([target]) => return Ok(target.clone()),
                Some([_, _, ..]) => return Err(EtlError::RefResolvesMultipleObjects(key)),
                _ => {}
            }
        }
        self.resolver.resolve(reference)
    }

    /// Save the batch: in one call if possible, otherwise row by row
    pub fn save(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let groups = mem::take(&mut self.batch);
        let objects: Vec<IMObject> = groups.iter().flat_map(CommitGroup::objects).collect();

        let logs = match self.service.save(&objects) {
            Ok(()) => {
                info!("Saved {} objects from {} rows", objects.len(), groups.len());
                groups
                    .into_iter()
                    .flat_map(|group| self.saved(group))
                    .collect::<Vec<_>>()
            }
            Err(e) => {
                warn!(
                    "Batch save of {} rows failed, retrying individually: {}",
                    groups.len(),
                    e
                );
                self.save_individually(groups)
            }
        };
        self.dao.save(&logs)?;
        Ok(())
    }

    /// Save any remaining batch and release all working state
    pub fn end(&mut self) -> Result<()> {
        self.rollback();
        self.save()?;
        self.in_flight.clear();
        self.resolver.clear();
        Ok(())
    }

    fn save_individually(&mut self, groups: Vec<CommitGroup>) -> Vec<EtlLog> {
        let mut logs = Vec::new();
        for group in groups {
            match self.service.save(&group.objects()) {
                Ok(()) => logs.extend(self.saved(group)),
                Err(e) => {
                    let cause = EtlError::from(e);
                    warn!("Failed to save row {}: {}", group.row_id, cause);
                    self.failed_rows += 1;
                    logs.extend(self.failed(group, &cause.to_string()));
                }
            }
        }
        logs
    }

    fn saved(&mut self, group: CommitGroup) -> Vec<EtlLog> {
        group
            .pending
            .into_iter()
            .map(|mut pending| {
                self.release(&pending);
                pending.log.succeeded(pending.object.reference().clone());
                pending.log
            })
            .collect()
    }

    fn failed(&mut self, group: CommitGroup, message: &str) -> Vec<EtlLog> {
        group
            .pending
            .into_iter()
            .map(|mut pending| {
                self.release(&pending);
                pending.log.failed(message);
                pending.log
            })
            .collect()
    }

    /// Drop any batched group of `row_id`
    fn discard(&mut self, row_id: &str) {
        let (stale, kept): (Vec<CommitGroup>, Vec<CommitGroup>) = mem::take(&mut self.batch)
            .into_iter()
            .partition(|g| g.row_id == row_id);
        self.batch = kept;
        for group in stale {
            debug!("Replacing batched objects of row {}", group.row_id);
            for pending in &group.pending {
                self.release(pending);
            }
        }
    }

    /// Drop an object from the in-flight tier
    fn release(&mut self, pending: &Pending) {
        if let Some(targets) = self.in_flight.get_mut(&pending.key) {
            targets.retain(|t| t != pending.object.reference());
            if targets.is_empty() {
                self.in_flight.remove(&pending.key);
            }
        }
        self.resolver.forget(&pending.key);
    }
}
