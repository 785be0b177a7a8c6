use crate::config::Number;
use crate::error::{GlanceError, Result};
use futures::future::BoxFuture;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

/// A captured feature vector. Immutable and cheap to clone.
#[derive(Clone, PartialEq)]
pub struct Embedding(Arc<[Number]>);

impl Embedding {
    pub fn new(values: Vec<Number>) -> Self {
        Embedding(values.into())
    }

    /// Builds an embedding, rejecting wrong lengths and non-finite components.
    pub fn checked(values: Vec<Number>, dimensions: usize) -> Result<Self> {
        if values.len() != dimensions {
            return Err(GlanceError::DimensionMismatch {
                expected: dimensions,
                actual: values.len(),
            });
        }
        if let Some(position) = values.iter().position(|v| !v.is_finite()) {
            return Err(GlanceError::ExtractionFailure(format!(
                "component {} is not finite",
                position
            )));
        }
        Ok(Self::new(values))
    }

    pub fn as_slice(&self) -> &[Number] {
        &self.0
    }
}

impl Deref for Embedding {
    type Target = [Number];

    fn deref(&self) -> &[Number] {
        &self.0
    }
}

impl From<Vec<Number>> for Embedding {
    fn from(values: Vec<Number>) -> Self {
        Embedding::new(values)
    }
}

impl fmt::Debug for Embedding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = &self.0[..4.min(self.0.len())];
        write!(f, "Embedding(len={}, head={:?})", self.0.len(), head)
    }
}

/// Camera facing direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Facing {
    #[default]
    Environment,
    User,
}

impl Facing {
    pub fn flipped(self) -> Self {
        match self {
            Facing::Environment => Facing::User,
            Facing::User => Facing::Environment,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Frame {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub captured_at: Instant,
}

/// The live camera. Exclusively owned by the session.
pub trait FrameSource {
    fn acquire(&mut self, facing: Facing) -> Result<()>;
    fn release(&mut self);
    fn current_frame(&mut self) -> Result<Frame>;
}

/// A frozen feature extractor: one frame in, one `dimensions()`-long vector out.
pub trait EmbeddingSource {
    fn dimensions(&self) -> usize;
    fn embed(&self, frame: Frame) -> BoxFuture<'static, Result<Embedding>>;
}
