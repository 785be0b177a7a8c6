//! Test doubles for the camera and the feature extractor.

use crate::config::Number;
use crate::embedding::{Embedding, EmbeddingSource, Facing, Frame, FrameSource};
use crate::error::{GlanceError, Result};
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::oneshot;

#[derive(Default)]
pub struct FakeCamera {
    pub acquired: Option<Facing>,
    pub acquisitions: Vec<Facing>,
    pub releases: usize,
    pub fail_acquire: bool,
    pub fail_frames: bool,
    next_id: u64,
}

impl FakeCamera {
    /// A camera whose every acquisition is refused.
    pub fn failing() -> Self {
        Self {
            fail_acquire: true,
            ..Self::default()
        }
    }
}

impl FrameSource for FakeCamera {
    fn acquire(&mut self, facing: Facing) -> Result<()> {
        if self.fail_acquire {
            return Err(GlanceError::InitializationFailure(
                "camera permission denied".into(),
            ));
        }
        self.acquired = Some(facing);
        self.acquisitions.push(facing);
        Ok(())
    }

    fn release(&mut self) {
        self.acquired = None;
        self.releases += 1;
    }

    fn current_frame(&mut self) -> Result<Frame> {
        if self.acquired.is_none() {
            return Err(GlanceError::ExtractionFailure("camera not acquired".into()));
        }
        if self.fail_frames {
            return Err(GlanceError::ExtractionFailure("no frame available".into()));
        }
        self.next_id += 1;
        Ok(Frame {
            id: self.next_id,
            width: 4,
            height: 4,
            data: vec![0; 16],
            captured_at: Instant::now(),
        })
    }
}

/// Embeds every frame as whatever the scene currently shows.
#[derive(Clone)]
pub struct SceneEmbedder {
    dimensions: usize,
    scene: Arc<Mutex<Result<Vec<Number>>>>,
}

impl SceneEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            scene: Arc::new(Mutex::new(Ok(vec![1.0; dimensions]))),
        }
    }

    pub fn show(&self, values: Vec<Number>) {
        *self.scene.lock().unwrap() = Ok(values);
    }

    pub fn fail(&self, reason: &str) {
        *self.scene.lock().unwrap() = Err(GlanceError::ExtractionFailure(reason.into()));
    }
}

impl EmbeddingSource for SceneEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, _frame: Frame) -> BoxFuture<'static, Result<Embedding>> {
        let result = match &*self.scene.lock().unwrap() {
            Ok(values) => Embedding::checked(values.clone(), self.dimensions),
            Err(err) => Err(GlanceError::ExtractionFailure(err.to_string())),
        };
        future::ready(result).boxed()
    }
}

/// Embeddings stay pending until the test releases them.
#[derive(Clone)]
pub struct GatedEmbedder {
    dimensions: usize,
    gates: Arc<Mutex<VecDeque<oneshot::Sender<Result<Embedding>>>>>,
}

impl GatedEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            gates: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn pending(&self) -> usize {
        self.gates.lock().unwrap().len()
    }

    /// Resolves the oldest pending embedding.
    pub fn release(&self, values: Vec<Number>) {
        let gate = self.gates.lock().unwrap().pop_front().expect("no pending embedding");
        let _ = gate.send(Ok(Embedding::new(values)));
    }
}

impl EmbeddingSource for GatedEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, _frame: Frame) -> BoxFuture<'static, Result<Embedding>> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().push_back(tx);
        async move {
            rx.await
                .unwrap_or_else(|_| Err(GlanceError::ExtractionFailure("gate dropped".into())))
        }
        .boxed()
    }
}
