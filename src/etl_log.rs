//! ETL log: provenance of every loaded object
//!
//! One [`EtlLog`] is written per (loader, row, archetype, index) produced while
//! mapping a row. A row is *processed* once all of its logs exist without an
//! error. Logs with a reference also let later runs resolve `<archetype>rowId`
//! references to rows loaded earlier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DaoError;
use crate::model::ObjectRef;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtlLog {
    pub loader: String,
    pub row_id: String,
    /// `None` for a row-level failure that produced no objects
    pub archetype: Option<String>,
    /// Collection position, `None` when the object is not a collection member
    pub index: Option<usize>,
    /// Set once the object has been saved
    pub reference: Option<ObjectRef>,
    pub errors: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl EtlLog {
    pub fn new(
        loader: impl Into<String>,
        row_id: impl Into<String>,
        archetype: impl Into<String>,
        index: Option<usize>,
    ) -> Self {
        Self {
            loader: loader.into(),
            row_id: row_id.into(),
            archetype: Some(archetype.into()),
            index,
            reference: None,
            errors: None,
            recorded_at: Utc::now(),
        }
    }

    /// Log for a row that failed before producing any object
    pub fn row_error(
        loader: impl Into<String>,
        row_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            loader: loader.into(),
            row_id: row_id.into(),
            archetype: None,
            index: None,
            reference: None,
            errors: Some(message.into()),
            recorded_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_none() && self.reference.is_some()
    }

    pub fn succeeded(&mut self, reference: ObjectRef) {
        self.reference = Some(reference);
        self.errors = None;
        self.recorded_at = Utc::now();
    }

    pub fn failed(&mut self, message: impl Into<String>) {
        self.reference = None;
        self.errors = Some(message.into());
        self.recorded_at = Utc::now();
    }

    /// True if `other` describes the same produced object
    pub fn same_key(&self, other: &EtlLog) -> bool {
        self.loader == other.loader
            && self.row_id == other.row_id
            && self.archetype == other.archetype
            && self.index == other.index
    }
}

/// Durable storage of ETL logs
pub trait EtlLogDao: Send + Sync {
    /// Insert or replace logs, keyed by (loader, row, archetype, index)
    fn save(&self, logs: &[EtlLog]) -> Result<(), DaoError>;

    /// Logs for `row_id`, optionally restricted to one loader and one archetype
    fn get(
        &self,
        loader: Option<&str>,
        row_id: &str,
        archetype: Option<&str>,
    ) -> Result<Vec<EtlLog>, DaoError>;

    /// True if the row has logs and all of them succeeded
    fn processed(&self, loader: &str, row_id: &str) -> Result<bool, DaoError>;

    fn remove(&self, loader: &str, row_id: &str) -> Result<(), DaoError>;
}
