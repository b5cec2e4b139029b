//! Mapping set configuration
//!
//! A mapping set declares the legacy id column, the batch size and, per legacy
//! column, the target path its value is written to. Mapping sets are YAML:
//!
//! ```yaml
//! idColumn: CUSTOMER_ID
//! batchSize: 500
//! mapping:
//!   - source: FIRST_NAME
//!     target: <party.person>firstName
//!   - source: VET_ID
//!     target: <party.person>vet
//!     isReference: true
//!     value: <party.vet>$value
//! ```

pub mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::{Mapping, MappingSet, DEFAULT_BATCH_SIZE};
