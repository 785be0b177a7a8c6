use crate::classifier::Prediction;
use crate::config::Number;
use crate::error::{GlanceError, Result};
use std::time::Instant;
use tracing::{debug, info, warn};

pub const NOT_TRAINED_OVERLAY: &str = "Train the model first!";
pub const NOT_TRAINED_STATUS: &str = "No trained classes";
pub const RUNNING_STATUS: &str = "Recognition active...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionState {
    Stopped,
    Running,
}

/// Visual state of the result overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tone {
    #[default]
    Neutral,
    NotTrained,
    LowConfidence,
    HighConfidence,
}

/// What the recognition screen currently shows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct View {
    pub tone: Tone,
    pub overlay: String,
    pub status: String,
    pub updated_at: Option<Instant>,
}

impl View {
    pub fn is_neutral(&self) -> bool {
        self.tone == Tone::Neutral && self.overlay.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub label: String,
    pub confidence: Number,
    pub percent: u32,
    pub tone: Tone,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionOutcome {
    Rendered(Reading),
    /// The frame failed; the loop goes on with the next one.
    Skipped,
    /// Issued before a stop; ignored.
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecognitionTicket {
    pub generation: u64,
}

pub struct RecognitionController {
    state: RecognitionState,
    generation: u64,
    threshold: Number,
    view: View,
}

impl RecognitionController {
    pub fn new(threshold: Number) -> Self {
        Self {
            state: RecognitionState::Stopped,
            generation: 0,
            threshold,
            view: View::default(),
        }
    }

    pub fn state(&self) -> RecognitionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == RecognitionState::Running
    }

    pub fn threshold(&self) -> Number {
        self.threshold
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    /// Enters Running unless the classifier knows no classes, in which case the
    /// not-trained indicator is rendered and `NoTrainedClasses` returned.
    pub fn start(&mut self, trained_classes: usize) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        if trained_classes == 0 {
            self.view = View {
                tone: Tone::NotTrained,
                overlay: NOT_TRAINED_OVERLAY.to_string(),
                status: NOT_TRAINED_STATUS.to_string(),
                updated_at: Some(Instant::now()),
            };
            return Err(GlanceError::NoTrainedClasses);
        }

        self.generation += 1;
        self.state = RecognitionState::Running;
        self.view = View {
            status: RUNNING_STATUS.to_string(),
            updated_at: Some(Instant::now()),
            ..View::default()
        };
        info!(trained_classes, "recognition started");
        Ok(())
    }

    /// Stops and clears the view. Returns whether it was running.
    pub fn stop(&mut self) -> bool {
        let was_running = self.is_running();
        self.generation += 1;
        self.state = RecognitionState::Stopped;
        self.view = View::default();
        if was_running {
            info!("recognition stopped");
        }
        was_running
    }

    pub fn issue(&self) -> Option<RecognitionTicket> {
        self.is_running().then_some(RecognitionTicket {
            generation: self.generation,
        })
    }

    pub fn is_current(&self, ticket: RecognitionTicket) -> bool {
        self.is_running() && ticket.generation == self.generation
    }

    pub fn complete(
        &mut self,
        ticket: RecognitionTicket,
        predicted: Result<Prediction>,
    ) -> RecognitionOutcome {
        if !self.is_current(ticket) {
            debug!(generation = ticket.generation, "stale recognition result discarded");
            return RecognitionOutcome::Discarded;
        }

        match predicted {
            Ok(prediction) => RecognitionOutcome::Rendered(self.render(prediction)),
            Err(err) => {
                warn!(error = %err, "recognition frame skipped");
                RecognitionOutcome::Skipped
            }
        }
    }

    fn render(&mut self, prediction: Prediction) -> Reading {
        let confidence = prediction.confidence();
        let percent = (confidence * 100.0).round() as u32;
        let tone = if confidence >= self.threshold {
            Tone::HighConfidence
        } else {
            Tone::LowConfidence
        };

        self.view = View {
            tone,
            overlay: format!("{} ({}%)", prediction.label, percent),
            status: format!("Last: {} ({}%)", prediction.label, percent),
            updated_at: Some(Instant::now()),
        };

        Reading {
            label: prediction.label,
            confidence,
            percent,
            tone,
        }
    }
}
