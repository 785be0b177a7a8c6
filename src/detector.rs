use crate::classifier::{Classifier, KnnClassifier};
use crate::config::Number;
use crate::embedding::Embedding;
use crate::error::{GlanceError, Result};
use crate::persistence::PersistenceCodec;
use crate::store::{Dataset, ExampleStore};
use serde::Serialize;
use tracing::debug;

/// Whether the target class is in view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Presence {
    pub target: String,
    pub present: bool,
    pub confidence: Number,
    /// The overall winning label, which may differ from the target.
    pub predicted: String,
}

/// Answers "is `target` in this frame?" against a fixed, previously exported model.
pub struct PresenceDetector {
    store: ExampleStore<KnnClassifier>,
    target: String,
    threshold: Number,
}

impl PresenceDetector {
    pub fn from_dataset(
        dataset: Dataset,
        dimensions: usize,
        target: &str,
        threshold: Number,
        neighbors: usize,
    ) -> Result<Self> {
        if dataset.get(target).map_or(true, |examples| examples.is_empty()) {
            return Err(GlanceError::UnknownLabel(target.to_string()));
        }

        let mut store = ExampleStore::new(KnnClassifier::new(neighbors), dimensions);
        store.restore(dataset)?;
        debug!(
            target,
            classes = store.class_count(),
            examples = store.total_examples(),
            "presence detector ready"
        );

        Ok(Self {
            store,
            target: target.to_string(),
            threshold,
        })
    }

    pub fn from_record(
        text: &str,
        codec: &PersistenceCodec,
        target: &str,
        threshold: Number,
        neighbors: usize,
    ) -> Result<Self> {
        let dataset = codec.load(text)?;
        Self::from_dataset(dataset, codec.dimensions(), target, threshold, neighbors)
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub async fn detect(&self, embedding: Embedding) -> Result<Presence> {
        let prediction = self.store.classifier().predict_class(embedding).await?;
        let confidence = prediction.confidence_for(&self.target);
        Ok(Presence {
            target: self.target.clone(),
            present: confidence >= self.threshold,
            confidence,
            predicted: prediction.label,
        })
    }
}
