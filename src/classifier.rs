use crate::config::Number;
use crate::embedding::Embedding;
use crate::error::{GlanceError, Result};
use crate::vector_ops::{cosine_similarity, normalize_vector};
use futures::future::BoxFuture;
use futures::FutureExt;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    /// Every known class mapped to its share of the neighbor votes, in `[0, 1]`.
    pub confidences: BTreeMap<String, Number>,
}

impl Prediction {
    pub fn confidence(&self) -> Number {
        self.confidence_for(&self.label)
    }

    pub fn confidence_for(&self, label: &str) -> Number {
        self.confidences.get(label).copied().unwrap_or(0.0)
    }
}

/// Nearest-neighbor engine the example store mirrors every mutation into.
pub trait Classifier {
    fn add_example(&mut self, embedding: Embedding, label: &str);
    fn remove_class(&mut self, label: &str);
    fn clear_all(&mut self);
    /// Number of classes holding at least one example.
    fn class_count(&self) -> usize;
    fn example_count(&self, label: &str) -> usize;
    /// Fails with `NoExamples` when `class_count()` is zero.
    fn predict_class(&self, embedding: Embedding) -> BoxFuture<'static, Result<Prediction>>;
}

#[derive(Clone)]
struct LabeledExample {
    label: Arc<str>,
    vector: Arc<[Number]>,
}

/// Exact k-nearest-neighbor classifier over cosine similarity.
///
/// Stored vectors are L2-normalized on insert. The example list is copy-on-write, so a
/// prediction issued before a mutation keeps scoring against the data it was issued with.
#[derive(Clone)]
pub struct KnnClassifier {
    k: usize,
    examples: Arc<Vec<LabeledExample>>,
    counts: BTreeMap<String, usize>,
}

impl KnnClassifier {
    pub fn new(k: usize) -> Self {
        Self {
            k: k.max(1),
            examples: Arc::new(Vec::new()),
            counts: BTreeMap::new(),
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn total_examples(&self) -> usize {
        self.examples.len()
    }

    /// Synchronous prediction against the current examples.
    pub fn predict_now(&self, query: &[Number]) -> Result<Prediction> {
        let labels: Vec<String> = self.counts.keys().cloned().collect();
        rank(&self.examples, &labels, query, self.k)
    }
}

impl Classifier for KnnClassifier {
    fn add_example(&mut self, embedding: Embedding, label: &str) {
        let mut vector = embedding.to_vec();
        normalize_vector(&mut vector);
        Arc::make_mut(&mut self.examples).push(LabeledExample {
            label: Arc::from(label),
            vector: vector.into(),
        });
        *self.counts.entry(label.to_string()).or_insert(0) += 1;
    }

    fn remove_class(&mut self, label: &str) {
        if self.counts.remove(label).is_some() {
            Arc::make_mut(&mut self.examples).retain(|example| &*example.label != label);
        }
    }

    fn clear_all(&mut self) {
        self.examples = Arc::new(Vec::new());
        self.counts.clear();
    }

    fn class_count(&self) -> usize {
        self.counts.len()
    }

    fn example_count(&self, label: &str) -> usize {
        self.counts.get(label).copied().unwrap_or(0)
    }

    fn predict_class(&self, embedding: Embedding) -> BoxFuture<'static, Result<Prediction>> {
        let examples = Arc::clone(&self.examples);
        let labels: Vec<String> = self.counts.keys().cloned().collect();
        let k = self.k;
        async move { rank(&examples, &labels, &embedding, k) }.boxed()
    }
}

fn rank(
    examples: &[LabeledExample],
    labels: &[String],
    query: &[Number],
    k: usize,
) -> Result<Prediction> {
    if examples.is_empty() {
        return Err(GlanceError::NoExamples);
    }

    let mut normalized_query = query.to_vec();
    normalize_vector(&mut normalized_query);

    let mut scored = examples
        .par_iter()
        .map(|example| {
            cosine_similarity(&normalized_query, &example.vector).map(|sim| (sim, example))
        })
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| {
            let stored = examples.first().map(|e| e.vector.len()).unwrap_or(0);
            GlanceError::PredictionFailure(format!(
                "query has {} components, stored examples have {}",
                query.len(),
                stored
            ))
        })?;

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    scored.truncate(k);
    let neighbors = scored.len() as Number;

    let mut votes: BTreeMap<&str, (usize, Number)> = BTreeMap::new();
    for (similarity, example) in &scored {
        let tally = votes.entry(&*example.label).or_insert((0, 0.0));
        tally.0 += 1;
        tally.1 += similarity;
    }

    // Most votes wins, then the larger summed similarity, then the smaller label.
    let label = votes
        .iter()
        .max_by(|a, b| {
            a.1 .0
                .cmp(&b.1 .0)
                .then_with(|| a.1 .1.partial_cmp(&b.1 .1).unwrap_or(Ordering::Equal))
                .then_with(|| b.0.cmp(a.0))
        })
        .map(|(label, _)| label.to_string())
        .ok_or(GlanceError::NoExamples)?;

    let confidences = labels
        .iter()
        .map(|l| {
            let share = votes
                .get(l.as_str())
                .map(|(count, _)| *count as Number / neighbors)
                .unwrap_or(0.0);
            (l.clone(), share)
        })
        .collect();

    Ok(Prediction { label, confidences })
}
