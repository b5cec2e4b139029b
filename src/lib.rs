//! ob-etl: legacy row loader for the archetype object model
//!
//! Migrates rows from a legacy relational source into archetype objects:
//! - Path expressions describing where a column lands in an object graph
//! - Symbolic references between rows, by row id or natural key
//! - Lookup resolution for coded members
//! - Batched saving with per-row fallback and an ETL log of what each row
//!   produced
//! - YAML mapping sets and loader
//!
//! Persistence is behind the [`ArchetypeService`], [`EtlLogDao`] and
//! [`LookupService`] traits; the `memory` module has in-memory versions.

pub mod config;
pub mod error;
pub mod etl_log;
pub mod graph;
pub mod handler;
pub mod loader;
pub mod lookup;
pub mod mapper;
pub mod memory;
pub mod model;
pub mod path;
pub mod reference;
pub mod resolver;
pub mod service;

// Re-export commonly used types
pub use config::loader::ConfigLoader;
pub use config::types::*;
pub use error::{DaoError, ErrorCode, EtlError, Result, ServiceError};
pub use etl_log::{EtlLog, EtlLogDao};
pub use handler::ObjectHandler;
pub use loader::{LoadStats, Loader};
pub use lookup::{LookupResolver, LookupService};
pub use mapper::RowMapper;
pub use model::{IMObject, LegacyRow, ObjectRef, Value};
pub use path::{parse_path, Node};
pub use reference::SymbolicReference;
pub use service::{ArchetypeDescriptor, ArchetypeService, MemberDescriptor, MemberKind};
