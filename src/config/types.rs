//! Mapping set types

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BATCH_SIZE: i64 = 1000;

fn default_batch_size() -> i64 {
    DEFAULT_BATCH_SIZE
}

fn default_skip_processed() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingSet {
    /// Legacy column holding the row id
    pub id_column: String,
    /// Column mappings, applied in declaration order
    #[serde(default)]
    pub mapping: Vec<Mapping>,
    /// Objects to accumulate before saving. Values <= 0 mean 1.
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    /// Skip rows whose objects were all loaded by an earlier run
    #[serde(default = "default_skip_processed")]
    pub skip_processed: bool,
}

impl MappingSet {
    pub fn new(id_column: impl Into<String>) -> Self {
        Self {
            id_column: id_column.into(),
            mapping: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            skip_processed: true,
        }
    }

    pub fn with_mapping(mut self, mapping: Mapping) -> Self {
        self.mapping.push(mapping);
        self
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_skip_processed(mut self, skip_processed: bool) -> Self {
        self.skip_processed = skip_processed;
        self
    }

    pub fn effective_batch_size(&self) -> usize {
        usize::try_from(self.batch_size).unwrap_or(0).max(1)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let mappings: MappingSet =
            serde_yaml::from_str(content).context("Failed to parse mapping set")?;
        mappings.validate()?;
        Ok(mappings)
    }

    /// Structural checks. Target paths are checked when a row mapper is built.
    pub fn validate(&self) -> Result<()> {
        if self.id_column.trim().is_empty() {
            return Err(anyhow!("Mapping set has no idColumn"));
        }
        if self.mapping.is_empty() {
            return Err(anyhow!("Mapping set has no mappings"));
        }
        for (i, mapping) in self.mapping.iter().enumerate() {
            if mapping.source.trim().is_empty() {
                return Err(anyhow!("Mapping {} has no source column", i));
            }
            if mapping.target.trim().is_empty() {
                return Err(anyhow!(
                    "Mapping {} ({}) has no target",
                    i,
                    mapping.source
                ));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    /// Legacy column name
    pub source: String,
    /// Target path expression
    pub target: String,
    /// Literal override. `$value` is replaced by the column value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Skip this mapping when the column is null
    #[serde(default, alias = "excludeIfNull")]
    pub exclude_null: bool,
    /// The value is a symbolic reference to another object
    #[serde(default)]
    pub is_reference: bool,
    /// Drop default collection members before appending mapped ones
    #[serde(default)]
    pub remove_default_objects: bool,
    /// Create unknown lookup codes instead of failing
    #[serde(default)]
    pub create_lookup: bool,
}

impl Mapping {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            value: None,
            exclude_null: false,
            is_reference: false,
            remove_default_objects: false,
            create_lookup: false,
        }
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn exclude_null(mut self) -> Self {
        self.exclude_null = true;
        self
    }

    pub fn reference(mut self) -> Self {
        self.is_reference = true;
        self
    }

    pub fn remove_default_objects(mut self) -> Self {
        self.remove_default_objects = true;
        self
    }

    pub fn create_lookup(mut self) -> Self {
        self.create_lookup = true;
        self
    }

    /// The value to store for a raw column value, after literal substitution
    pub fn apply_value(&self, raw: Option<&str>) -> Option<String> {
        match &self.value {
            Some(literal) if literal.contains("$value") => {
                raw.map(|raw| literal.replace("$value", raw))
            }
            Some(literal) => Some(literal.clone()),
            None => raw.map(str::to_string),
        }
    }
}
