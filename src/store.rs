use crate::classifier::Classifier;
use crate::embedding::Embedding;
use crate::error::{GlanceError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRecord {
    pub name: String,
    #[serde(rename = "exampleCount")]
    pub example_count: usize,
}

/// Label to examples in capture order, classes in insertion order.
pub type Dataset = IndexMap<String, Vec<Embedding>>;

struct ClassEntry {
    record: ClassRecord,
    examples: Vec<Embedding>,
}

/// Owns the labeled examples and the classifier they are mirrored into.
///
/// Every mutation here makes exactly one matching call on the classifier, so the
/// per-label counts of both sides always agree.
pub struct ExampleStore<C: Classifier> {
    dimensions: usize,
    classes: Vec<ClassEntry>,
    classifier: C,
}

impl<C: Classifier> ExampleStore<C> {
    pub fn new(classifier: C, dimensions: usize) -> Self {
        Self {
            dimensions,
            classes: Vec::new(),
            classifier,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    pub fn add_class(&mut self, label: &str) -> Result<ClassRecord> {
        let label = label.trim();
        if label.is_empty() {
            return Err(GlanceError::EmptyLabel);
        }
        if self.position(label).is_some() {
            return Err(GlanceError::DuplicateLabel(label.to_string()));
        }

        let record = ClassRecord {
            name: label.to_string(),
            example_count: 0,
        };
        self.classes.push(ClassEntry {
            record: record.clone(),
            examples: Vec::new(),
        });
        debug_assert!(self.is_consistent());
        debug!(label, "class added");
        Ok(record)
    }

    pub fn delete_class(&mut self, label: &str) -> Result<ClassRecord> {
        let index = self
            .position(label)
            .ok_or_else(|| GlanceError::UnknownLabel(label.to_string()))?;
        let entry = self.classes.remove(index);
        self.classifier.remove_class(label);
        debug_assert!(self.is_consistent());
        debug!(label, examples = entry.examples.len(), "class deleted");
        Ok(entry.record)
    }

    /// Appends one example and returns the new count for `label`.
    pub fn append_example(&mut self, label: &str, embedding: Embedding) -> Result<usize> {
        let index = self
            .position(label)
            .ok_or_else(|| GlanceError::UnknownLabel(label.to_string()))?;
        if embedding.len() != self.dimensions {
            return Err(GlanceError::DimensionMismatch {
                expected: self.dimensions,
                actual: embedding.len(),
            });
        }

        let entry = &mut self.classes[index];
        entry.examples.push(embedding.clone());
        entry.record.example_count += 1;
        let count = entry.record.example_count;
        self.classifier.add_example(embedding, label);
        debug_assert!(self.is_consistent());
        Ok(count)
    }

    pub fn clear_all(&mut self) {
        self.classes.clear();
        self.classifier.clear_all();
        debug_assert!(self.is_consistent());
    }

    /// Replaces the whole dataset, re-registering every vector through `append_example`.
    /// The store is left untouched if the dataset does not validate.
    pub fn restore(&mut self, dataset: Dataset) -> Result<()> {
        for (label, examples) in &dataset {
            if label.trim().is_empty() || label.trim() != label {
                return Err(GlanceError::CorruptRecord(format!(
                    "invalid class label '{}'",
                    label
                )));
            }
            if let Some(bad) = examples.iter().find(|e| e.len() != self.dimensions) {
                return Err(GlanceError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: bad.len(),
                });
            }
        }

        self.clear_all();
        for (label, examples) in dataset {
            self.add_class(&label)?;
            for embedding in examples {
                self.append_example(&label, embedding)?;
            }
        }
        debug_assert!(self.is_consistent());
        Ok(())
    }

    pub fn record(&self, label: &str) -> Option<&ClassRecord> {
        self.position(label).map(|i| &self.classes[i].record)
    }

    /// Class records in insertion order.
    pub fn records(&self) -> impl Iterator<Item = &ClassRecord> {
        self.classes.iter().map(|entry| &entry.record)
    }

    pub fn examples(&self, label: &str) -> Option<&[Embedding]> {
        self.position(label).map(|i| self.classes[i].examples.as_slice())
    }

    pub fn contains(&self, label: &str) -> bool {
        self.position(label).is_some()
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Classes the classifier can actually predict, i.e. those with examples.
    pub fn trained_class_count(&self) -> usize {
        self.classifier.class_count()
    }

    pub fn total_examples(&self) -> usize {
        self.classes.iter().map(|entry| entry.examples.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn dataset(&self) -> Dataset {
        self.classes
            .iter()
            .map(|entry| (entry.record.name.clone(), entry.examples.clone()))
            .collect()
    }

    /// Every record count matches both the stored examples and the classifier.
    pub fn is_consistent(&self) -> bool {
        self.classes.iter().all(|entry| {
            entry.record.example_count == entry.examples.len()
                && self.classifier.example_count(&entry.record.name) == entry.examples.len()
        }) && self.classifier.class_count()
            == self
                .classes
                .iter()
                .filter(|entry| !entry.examples.is_empty())
                .count()
    }

    fn position(&self, label: &str) -> Option<usize> {
        self.classes.iter().position(|entry| entry.record.name == label)
    }
}
