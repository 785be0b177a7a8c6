//! Textual model record: class records plus every embedding flattened per label.

use crate::classifier::Classifier;
use crate::config::Number;
use crate::embedding::Embedding;
use crate::error::{GlanceError, Result};
use crate::store::{ClassRecord, Dataset, ExampleStore};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistedModel {
    /// Keyed by label, in class insertion order.
    pub classes: IndexMap<String, ClassRecord>,
    /// Vectors of one label concatenated in capture order; length is `count * D`.
    pub dataset: IndexMap<String, Vec<Number>>,
}

impl PersistedModel {
    pub fn total_examples(&self, dimensions: usize) -> usize {
        self.dataset.values().map(|flat| flat.len() / dimensions.max(1)).sum()
    }
}

pub struct PersistenceCodec {
    dimensions: usize,
}

impl PersistenceCodec {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn save<C: Classifier>(&self, store: &ExampleStore<C>) -> Result<PersistedModel> {
        if store.trained_class_count() == 0 {
            return Err(GlanceError::EmptyDataset);
        }

        let mut classes = IndexMap::new();
        let mut dataset = IndexMap::new();
        for record in store.records() {
            classes.insert(record.name.clone(), record.clone());
            let examples = store.examples(&record.name).unwrap_or(&[]);
            if examples.is_empty() {
                continue;
            }
            let mut flat = Vec::with_capacity(examples.len() * self.dimensions);
            for embedding in examples {
                flat.extend_from_slice(embedding);
            }
            dataset.insert(record.name.clone(), flat);
        }

        Ok(PersistedModel { classes, dataset })
    }

    pub fn encode(&self, model: &PersistedModel) -> Result<String> {
        serde_json::to_string(model)
            .map_err(|e| GlanceError::CorruptRecord(format!("failed to encode model: {}", e)))
    }

    pub fn decode(&self, text: &str) -> Result<PersistedModel> {
        serde_json::from_str(text).map_err(|e| GlanceError::CorruptRecord(e.to_string()))
    }

    pub fn load(&self, text: &str) -> Result<Dataset> {
        self.restore(self.decode(text)?)
    }

    /// Validates a decoded record and rebuilds the dataset.
    ///
    /// Example counts come from the flat arrays; the stored `exampleCount` is only
    /// compared and reported.
    pub fn restore(&self, model: PersistedModel) -> Result<Dataset> {
        let PersistedModel { classes, mut dataset } = model;

        for label in dataset.keys() {
            if !classes.contains_key(label) {
                return Err(GlanceError::CorruptRecord(format!(
                    "embeddings for '{}' have no class record",
                    label
                )));
            }
        }

        let mut restored = Dataset::new();
        for (key, record) in classes {
            if key.trim().is_empty() || key.trim() != key {
                return Err(GlanceError::CorruptRecord(format!(
                    "invalid class label '{}'",
                    key
                )));
            }
            if record.name != key {
                return Err(GlanceError::CorruptRecord(format!(
                    "class record '{}' is stored under '{}'",
                    record.name, key
                )));
            }

            let flat = dataset.swap_remove(&key).unwrap_or_default();
            if flat.len() % self.dimensions != 0 {
                return Err(GlanceError::CorruptRecord(format!(
                    "'{}' has {} values, not a multiple of {}",
                    key,
                    flat.len(),
                    self.dimensions
                )));
            }
            if flat.iter().any(|v| !v.is_finite()) {
                return Err(GlanceError::CorruptRecord(format!(
                    "'{}' contains non-finite values",
                    key
                )));
            }

            let examples: Vec<Embedding> = flat
                .chunks_exact(self.dimensions)
                .map(|chunk| Embedding::new(chunk.to_vec()))
                .collect();
            if examples.len() != record.example_count {
                warn!(
                    label = %key,
                    stored = record.example_count,
                    actual = examples.len(),
                    "stored example count disagrees with data; using data"
                );
            }
            restored.insert(key, examples);
        }

        Ok(restored)
    }
}
