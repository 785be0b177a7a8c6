//! Feature vectors read from a line-oriented JSON stream, standing in for a live camera.

use crate::config::Number;
use crate::embedding::{Embedding, EmbeddingSource, Facing, Frame, FrameSource};
use crate::error::{GlanceError, Result};
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use serde::Deserialize;
use std::collections::VecDeque;
use std::io::{BufRead, Lines};
use std::mem::size_of;
use std::time::Instant;
use tracing::debug;

#[derive(Deserialize)]
#[serde(untagged)]
enum FeatureLine {
    Bare(Vec<Number>),
    Tagged { vector: Vec<Number> },
}

impl FeatureLine {
    fn into_vector(self) -> Vec<Number> {
        match self {
            FeatureLine::Bare(vector) | FeatureLine::Tagged { vector } => vector,
        }
    }
}

/// Parses one feed line, either `[..]` or `{"vector": [..]}`.
pub fn parse_feature_line(line: &str, dimensions: usize) -> Result<Vec<Number>> {
    let vector = serde_json::from_str::<FeatureLine>(line)
        .map_err(|err| GlanceError::ExtractionFailure(format!("unreadable feature line: {}", err)))?
        .into_vector();
    if vector.len() != dimensions {
        return Err(GlanceError::DimensionMismatch {
            expected: dimensions,
            actual: vector.len(),
        });
    }
    Ok(vector)
}

/// A frame source yielding one frame per feed line. Frames carry the vector as a
/// little-endian f32 payload, `width = dimensions`, `height = 1`.
pub struct FeatureFeed<R> {
    lines: Lines<R>,
    queued: VecDeque<Vec<Number>>,
    dimensions: usize,
    facing: Option<Facing>,
    exhausted: bool,
    next_id: u64,
}

impl<R: BufRead> FeatureFeed<R> {
    pub fn from_reader(reader: R, dimensions: usize) -> Self {
        Self {
            lines: reader.lines(),
            queued: VecDeque::new(),
            dimensions,
            facing: None,
            exhausted: false,
            next_id: 0,
        }
    }

    /// Queues a vector ahead of the remaining lines.
    pub fn push(&mut self, vector: Vec<Number>) {
        self.queued.push_back(vector);
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted && self.queued.is_empty()
    }

    pub fn facing(&self) -> Option<Facing> {
        self.facing
    }

    fn next_vector(&mut self) -> Result<Vec<Number>> {
        if let Some(vector) = self.queued.pop_front() {
            return Ok(vector);
        }
        loop {
            match self.lines.next() {
                Some(line) => {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    return parse_feature_line(&line, self.dimensions);
                }
                None => {
                    self.exhausted = true;
                    return Err(GlanceError::ExtractionFailure(
                        "feature feed exhausted".into(),
                    ));
                }
            }
        }
    }
}

impl<R: BufRead> FrameSource for FeatureFeed<R> {
    fn acquire(&mut self, facing: Facing) -> Result<()> {
        self.facing = Some(facing);
        Ok(())
    }

    fn release(&mut self) {
        self.facing = None;
    }

    fn current_frame(&mut self) -> Result<Frame> {
        if self.facing.is_none() {
            return Err(GlanceError::ExtractionFailure("feed not acquired".into()));
        }
        let vector = self.next_vector()?;
        self.next_id += 1;
        debug!(frame = self.next_id, "feature frame read");

        Ok(Frame {
            id: self.next_id,
            width: self.dimensions as u32,
            height: 1,
            data: vector.iter().flat_map(|v| v.to_le_bytes()).collect(),
            captured_at: Instant::now(),
        })
    }
}

/// Decodes frames produced by [`FeatureFeed`] back into embeddings.
#[derive(Debug, Clone, Copy)]
pub struct FeatureFrameEmbedder {
    dimensions: usize,
}

impl FeatureFrameEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn decode(&self, frame: &Frame) -> Result<Embedding> {
        let width = size_of::<Number>();
        if frame.data.len() % width != 0 {
            return Err(GlanceError::ExtractionFailure(format!(
                "frame {} payload of {} bytes is not a vector",
                frame.id,
                frame.data.len()
            )));
        }
        let values = frame
            .data
            .chunks_exact(width)
            .map(|chunk| {
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(chunk);
                Number::from_le_bytes(bytes)
            })
            .collect();
        Embedding::checked(values, self.dimensions)
    }
}

impl EmbeddingSource for FeatureFrameEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, frame: Frame) -> BoxFuture<'static, Result<Embedding>> {
        future::ready(self.decode(&frame)).boxed()
    }
}
