use crate::classifier::Classifier;
use crate::embedding::Embedding;
use crate::error::Result;
use crate::store::ExampleStore;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing { label: String },
}

/// One issued capture tick. Only applied if the controller has not moved on since.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureTicket {
    pub generation: u64,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Appended { label: String, count: usize },
    /// The tick was issued before a stop or restart; nothing was applied.
    Discarded,
}

pub struct CaptureController {
    state: CaptureState,
    generation: u64,
    period: Duration,
}

impl CaptureController {
    pub fn new(period: Duration) -> Self {
        Self {
            state: CaptureState::Idle,
            generation: 0,
            period,
        }
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self.state, CaptureState::Capturing { .. })
    }

    pub fn active_label(&self) -> Option<&str> {
        match &self.state {
            CaptureState::Capturing { label } => Some(label),
            CaptureState::Idle => None,
        }
    }

    /// Starts capturing into `label`. A different active label is forced to Idle first and
    /// returned. Starting the label that is already capturing changes nothing.
    pub fn start(&mut self, label: &str) -> Option<String> {
        if self.active_label() == Some(label) {
            return None;
        }
        let previous = self.stop();
        self.generation += 1;
        self.state = CaptureState::Capturing {
            label: label.to_string(),
        };
        info!(label, "capture started");
        previous
    }

    /// Returns the label that was capturing, if any.
    pub fn stop(&mut self) -> Option<String> {
        match std::mem::replace(&mut self.state, CaptureState::Idle) {
            CaptureState::Capturing { label } => {
                self.generation += 1;
                info!(label = %label, "capture stopped");
                Some(label)
            }
            CaptureState::Idle => None,
        }
    }

    pub fn issue(&self) -> Option<CaptureTicket> {
        self.active_label().map(|label| CaptureTicket {
            generation: self.generation,
            label: label.to_string(),
        })
    }

    pub fn is_current(&self, ticket: &CaptureTicket) -> bool {
        ticket.generation == self.generation
            && self.active_label() == Some(ticket.label.as_str())
    }

    /// Applies a settled tick. Any failure stops capture and is returned to the caller.
    pub fn complete<C: Classifier>(
        &mut self,
        ticket: CaptureTicket,
        embedded: Result<Embedding>,
        store: &mut ExampleStore<C>,
    ) -> Result<CaptureOutcome> {
        if !self.is_current(&ticket) {
            debug!(
                label = %ticket.label,
                generation = ticket.generation,
                "stale capture tick discarded"
            );
            return Ok(CaptureOutcome::Discarded);
        }

        match embedded.and_then(|embedding| store.append_example(&ticket.label, embedding)) {
            Ok(count) => {
                debug!(label = %ticket.label, count, "example captured");
                Ok(CaptureOutcome::Appended {
                    label: ticket.label,
                    count,
                })
            }
            Err(err) => {
                warn!(label = %ticket.label, error = %err, "capture failed");
                self.stop();
                Err(err)
            }
        }
    }
}
