//! Top-level coordinator: owns the session state, both controllers, the example store,
//! the camera, the feature extractor and model storage, and drives them cooperatively.
//!
//! At most one request (a capture embedding, a recognition embedding or a prediction) is
//! in flight at any time. Every request carries its controller's ticket, and a stop or
//! restart invalidates the ticket, so results that settle late are dropped.

use crate::capture::{CaptureController, CaptureOutcome, CaptureTicket};
use crate::classifier::{Classifier, Prediction};
use crate::config::Settings;
use crate::embedding::{Embedding, EmbeddingSource, Facing, FrameSource};
use crate::error::{GlanceError, Result, Severity};
use crate::persistence::PersistenceCodec;
use crate::recognition::{
    Reading, RecognitionController, RecognitionOutcome, RecognitionTicket, View,
};
use crate::storage::ModelStorage;
use crate::store::{ClassRecord, ExampleStore};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Training,
    Recognition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionState {
    pub mode: Mode,
    pub facing: Facing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    AddClass(String),
    DeleteClass(String),
    StartCapture(String),
    StopCapture,
    SwitchMode(Mode),
    FlipCamera,
    Save,
    Load,
    Clear,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ClassAdded(ClassRecord),
    ClassDeleted(ClassRecord),
    CaptureStarted(String),
    CaptureStopped(String),
    ExampleCaptured { label: String, count: usize },
    Recognized(Reading),
    ModeChanged(Mode),
    CameraFlipped(Facing),
    Saved { classes: usize, examples: usize },
    Loaded { classes: usize, examples: usize },
    Cleared,
    Notice { severity: Severity, message: String },
}

/// A settled request, tagged with the ticket it was issued under.
pub enum Settled {
    Captured(CaptureTicket, Result<Embedding>),
    Embedded(RecognitionTicket, Result<Embedding>),
    Predicted(RecognitionTicket, Result<Prediction>),
}

pub type Pending = BoxFuture<'static, Settled>;

pub struct Session<F, E, C, S>
where
    F: FrameSource,
    E: EmbeddingSource,
    C: Classifier,
    S: ModelStorage,
{
    state: SessionState,
    storage_key: String,
    frame_interval: Duration,
    store: ExampleStore<C>,
    codec: PersistenceCodec,
    capture: CaptureController,
    recognition: RecognitionController,
    camera: F,
    embedder: E,
    storage: S,
    events: Vec<Event>,
}

impl<F, E, C, S> Session<F, E, C, S>
where
    F: FrameSource,
    E: EmbeddingSource,
    C: Classifier,
    S: ModelStorage,
{
    pub fn new(settings: &Settings, camera: F, embedder: E, classifier: C, storage: S) -> Result<Self> {
        if embedder.dimensions() != settings.dimensions {
            return Err(GlanceError::InitializationFailure(format!(
                "feature extractor produces {} dimensions, configured for {}",
                embedder.dimensions(),
                settings.dimensions
            )));
        }

        Ok(Self {
            state: SessionState::default(),
            storage_key: settings.storage_key.clone(),
            frame_interval: settings.frame_interval,
            store: ExampleStore::new(classifier, settings.dimensions),
            codec: PersistenceCodec::new(settings.dimensions),
            capture: CaptureController::new(settings.capture_period),
            recognition: RecognitionController::new(settings.confidence_threshold),
            camera,
            embedder,
            storage,
            events: Vec::new(),
        })
    }

    /// Acquires the camera and restores the stored model, if there is one.
    pub fn open(&mut self) -> Result<()> {
        self.camera
            .acquire(self.state.facing)
            .map_err(|err| GlanceError::InitializationFailure(err.to_string()))?;
        info!(facing = ?self.state.facing, "camera acquired");

        if let Err(err) = self.load() {
            self.notify(err);
        }
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn store(&self) -> &ExampleStore<C> {
        &self.store
    }

    pub fn capture(&self) -> &CaptureController {
        &self.capture
    }

    pub fn recognition(&self) -> &RecognitionController {
        &self.recognition
    }

    pub fn view(&self) -> &View {
        self.recognition.view()
    }

    pub fn camera(&self) -> &F {
        &self.camera
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn handle(&mut self, command: Command) -> Result<()> {
        debug!(?command, "handling command");
        match command {
            Command::AddClass(label) => {
                let record = self.store.add_class(&label)?;
                self.emit(Event::ClassAdded(record));
            }
            Command::DeleteClass(label) => self.delete_class(&label)?,
            Command::StartCapture(label) => self.start_capture(&label)?,
            Command::StopCapture => self.stop_capture(),
            Command::SwitchMode(mode) => self.switch_mode(mode)?,
            Command::FlipCamera => self.flip_camera()?,
            Command::Save => self.save()?,
            Command::Load => {
                if !self.load()? {
                    info!("no saved model found");
                }
            }
            Command::Clear => self.clear()?,
            Command::Shutdown => self.shutdown(),
        }
        Ok(())
    }

    fn delete_class(&mut self, label: &str) -> Result<()> {
        if self.capture.active_label() == Some(label) {
            self.stop_capture();
        }
        let record = self.store.delete_class(label)?;
        if self.state.mode == Mode::Recognition {
            self.restart_recognition();
        }
        self.emit(Event::ClassDeleted(record));
        Ok(())
    }

    fn start_capture(&mut self, label: &str) -> Result<()> {
        if self.state.mode != Mode::Training {
            return Err(GlanceError::CameraBusy("recognition"));
        }
        if !self.store.contains(label) {
            return Err(GlanceError::UnknownLabel(label.to_string()));
        }
        if self.capture.active_label() == Some(label) {
            return Ok(());
        }
        if let Some(previous) = self.capture.start(label) {
            self.emit(Event::CaptureStopped(previous));
        }
        self.emit(Event::CaptureStarted(label.to_string()));
        Ok(())
    }

    fn stop_capture(&mut self) {
        if let Some(label) = self.capture.stop() {
            self.emit(Event::CaptureStopped(label));
        }
    }

    fn switch_mode(&mut self, mode: Mode) -> Result<()> {
        if self.state.mode != mode {
            self.state.mode = mode;
            self.emit(Event::ModeChanged(mode));
        }
        match mode {
            Mode::Training => {
                self.recognition.stop();
                Ok(())
            }
            Mode::Recognition => {
                self.stop_capture();
                self.recognition.start(self.store.trained_class_count())
            }
        }
    }

    fn flip_camera(&mut self) -> Result<()> {
        let facing = self.state.facing.flipped();
        self.state.facing = facing;
        self.camera.release();
        if let Err(err) = self.camera.acquire(facing) {
            self.stop_capture();
            self.recognition.stop();
            return Err(GlanceError::InitializationFailure(err.to_string()));
        }
        info!(?facing, "camera reacquired");
        self.emit(Event::CameraFlipped(facing));
        Ok(())
    }

    fn save(&mut self) -> Result<()> {
        let model = self.codec.save(&self.store)?;
        let text = self.codec.encode(&model)?;
        self.storage.put(&self.storage_key, &text)?;

        let examples = self.store.total_examples();
        info!(classes = model.classes.len(), examples, "model saved");
        self.emit(Event::Saved {
            classes: model.classes.len(),
            examples,
        });
        Ok(())
    }

    /// Returns `false` when nothing is stored. A corrupt record leaves state unchanged.
    fn load(&mut self) -> Result<bool> {
        let Some(text) = self.storage.get(&self.storage_key)? else {
            return Ok(false);
        };
        let dataset = self.codec.load(&text)?;

        self.stop_capture();
        self.store.restore(dataset)?;
        if self.state.mode == Mode::Recognition {
            self.restart_recognition();
        }

        let classes = self.store.class_count();
        let examples = self.store.total_examples();
        info!(classes, examples, "model loaded");
        self.emit(Event::Loaded { classes, examples });
        Ok(true)
    }

    fn clear(&mut self) -> Result<()> {
        self.stop_capture();
        self.store.clear_all();
        if self.state.mode == Mode::Recognition {
            self.restart_recognition();
        }
        self.storage.remove(&self.storage_key)?;
        info!("model cleared");
        self.emit(Event::Cleared);
        Ok(())
    }

    fn restart_recognition(&mut self) {
        self.recognition.stop();
        if let Err(err) = self.recognition.start(self.store.trained_class_count()) {
            debug!(error = %err, "recognition not restarted");
        }
    }

    pub fn shutdown(&mut self) {
        self.stop_capture();
        self.recognition.stop();
        self.camera.release();
    }

    /// Issues the next request for whichever controller is active.
    pub fn issue_next(&mut self) -> Result<Option<Pending>> {
        if self.capture.is_capturing() {
            self.issue_capture()
        } else {
            Ok(self.issue_recognition())
        }
    }

    pub fn issue_capture(&mut self) -> Result<Option<Pending>> {
        let Some(ticket) = self.capture.issue() else {
            return Ok(None);
        };
        match self.camera.current_frame() {
            Ok(frame) => Ok(Some(
                self.embedder
                    .embed(frame)
                    .map(move |embedded| Settled::Captured(ticket, embedded))
                    .boxed(),
            )),
            Err(err) => self.apply_capture(ticket, Err(err)).map(|_| None),
        }
    }

    pub fn issue_recognition(&mut self) -> Option<Pending> {
        let ticket = self.recognition.issue()?;
        match self.camera.current_frame() {
            Ok(frame) => Some(
                self.embedder
                    .embed(frame)
                    .map(move |embedded| Settled::Embedded(ticket, embedded))
                    .boxed(),
            ),
            Err(err) => {
                self.apply_recognition(ticket, Err(err));
                None
            }
        }
    }

    /// Applies a settled request. A recognition embedding continues as a prediction,
    /// which is returned as the next pending request.
    pub fn settle(&mut self, settled: Settled) -> Result<Option<Pending>> {
        match settled {
            Settled::Captured(ticket, embedded) => self.apply_capture(ticket, embedded).map(|_| None),
            Settled::Embedded(ticket, embedded) => {
                if !self.recognition.is_current(ticket) {
                    debug!("stale recognition embedding discarded");
                    return Ok(None);
                }
                match embedded {
                    Ok(embedding) => Ok(Some(
                        self.store
                            .classifier()
                            .predict_class(embedding)
                            .map(move |predicted| Settled::Predicted(ticket, predicted))
                            .boxed(),
                    )),
                    Err(err) => {
                        self.apply_recognition(ticket, Err(err));
                        Ok(None)
                    }
                }
            }
            Settled::Predicted(ticket, predicted) => {
                self.apply_recognition(ticket, predicted);
                Ok(None)
            }
        }
    }

    /// Runs one full capture tick or recognition frame. Returns `false` if idle.
    pub async fn step(&mut self) -> Result<bool> {
        let Some(mut pending) = self.issue_next()? else {
            return Ok(false);
        };
        loop {
            let settled = pending.await;
            match self.settle(settled)? {
                Some(next) => pending = next,
                None => return Ok(true),
            }
        }
    }

    /// Cooperative event loop. Commands take priority; the capture timer and the frame
    /// clock only fire while nothing is in flight. Ends on `Shutdown` or when the command
    /// channel closes, leaving both controllers stopped and the camera released.
    pub async fn run(
        &mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        events: mpsc::UnboundedSender<Event>,
    ) {
        let mut capture_timer = time::interval(self.capture.period());
        capture_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut frame_clock = time::interval(self.frame_interval);
        frame_clock.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight: Option<Pending> = None;

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => {
                        let generation = self.capture.generation();
                        if let Err(err) = self.handle(command) {
                            self.notify(err);
                        }
                        // A new capture ticks one full period after it starts.
                        if self.capture.is_capturing() && self.capture.generation() != generation {
                            capture_timer.reset();
                        }
                    }
                },
                settled = async {
                    match in_flight.as_mut() {
                        Some(pending) => pending.await,
                        None => std::future::pending::<Settled>().await,
                    }
                }, if in_flight.is_some() => {
                    in_flight = None;
                    match self.settle(settled) {
                        Ok(next) => in_flight = next,
                        Err(err) => self.notify(err),
                    }
                }
                _ = capture_timer.tick(), if in_flight.is_none() && self.capture.is_capturing() => {
                    match self.issue_capture() {
                        Ok(pending) => in_flight = pending,
                        Err(err) => self.notify(err),
                    }
                }
                _ = frame_clock.tick(), if in_flight.is_none() && self.recognition.is_running() => {
                    in_flight = self.issue_recognition();
                }
            }

            for event in self.take_events() {
                let _ = events.send(event);
            }
        }

        self.shutdown();
        for event in self.take_events() {
            let _ = events.send(event);
        }
    }

    fn apply_capture(&mut self, ticket: CaptureTicket, embedded: Result<Embedding>) -> Result<()> {
        let label = ticket.label.clone();
        match self.capture.complete(ticket, embedded, &mut self.store) {
            Ok(CaptureOutcome::Appended { label, count }) => {
                self.emit(Event::ExampleCaptured { label, count });
                Ok(())
            }
            Ok(CaptureOutcome::Discarded) => Ok(()),
            Err(err) => {
                self.emit(Event::CaptureStopped(label));
                Err(err)
            }
        }
    }

    fn apply_recognition(&mut self, ticket: RecognitionTicket, predicted: Result<Prediction>) {
        if let RecognitionOutcome::Rendered(reading) = self.recognition.complete(ticket, predicted) {
            self.emit(Event::Recognized(reading));
        }
    }

    fn notify(&mut self, err: GlanceError) {
        let severity = err.severity();
        match severity {
            Severity::Blocking => error!(error = %err, "blocking failure"),
            Severity::Notice => info!(error = %err, "notice"),
            Severity::Transient => warn!(error = %err, "transient failure"),
        }
        self.emit(Event::Notice {
            severity,
            message: err.to_string(),
        });
    }

    fn emit(&mut self, event: Event) {
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::KnnClassifier;
    use crate::config::{Number, STORAGE_KEY};
    use crate::recognition::Tone;
    use crate::storage::MemoryStorage;
    use crate::testing::{FakeCamera, GatedEmbedder, SceneEmbedder};

    const D: usize = 4;
    const CAR: [Number; D] = [1.0, 0.0, 0.0, 0.0];
    const BIKE: [Number; D] = [0.0, 1.0, 0.0, 0.0];

    fn settings() -> Settings {
        Settings {
            dimensions: D,
            ..Settings::default()
        }
    }

    type TestSession<E> = Session<FakeCamera, E, KnnClassifier, MemoryStorage>;

    fn session_with<E: EmbeddingSource>(embedder: E, storage: MemoryStorage) -> TestSession<E> {
        let mut session = Session::new(
            &settings(),
            FakeCamera::default(),
            embedder,
            KnnClassifier::new(3),
            storage,
        )
        .unwrap();
        session.open().unwrap();
        session
    }

    fn scene_session() -> (TestSession<SceneEmbedder>, SceneEmbedder) {
        let scene = SceneEmbedder::new(D);
        (session_with(scene.clone(), MemoryStorage::new()), scene)
    }

    async fn capture_n<E: EmbeddingSource>(session: &mut TestSession<E>, label: &str, n: usize) {
        session.handle(Command::StartCapture(label.into())).unwrap();
        for _ in 0..n {
            assert!(session.step().await.unwrap());
        }
        session.handle(Command::StopCapture).unwrap();
    }

    async fn trained_session() -> (TestSession<SceneEmbedder>, SceneEmbedder) {
        let (mut session, scene) = scene_session();
        session.handle(Command::AddClass("car".into())).unwrap();
        session.handle(Command::AddClass("bike".into())).unwrap();
        scene.show(CAR.to_vec());
        capture_n(&mut session, "car", 3).await;
        scene.show(BIKE.to_vec());
        capture_n(&mut session, "bike", 3).await;
        session.take_events();
        (session, scene)
    }

    #[test]
    fn mismatched_extractor_fails_initialization() {
        let result = Session::new(
            &settings(),
            FakeCamera::default(),
            SceneEmbedder::new(D + 1),
            KnnClassifier::new(3),
            MemoryStorage::new(),
        );
        assert!(matches!(result, Err(GlanceError::InitializationFailure(_))));
    }

    #[test]
    fn camera_failure_is_blocking() {
        let mut session = Session::new(
            &settings(),
            FakeCamera::failing(),
            SceneEmbedder::new(D),
            KnnClassifier::new(3),
            MemoryStorage::new(),
        )
        .unwrap();
        let err = session.open().unwrap_err();
        assert_eq!(err.severity(), Severity::Blocking);
    }

    #[tokio::test]
    async fn capture_ticks_append_examples() {
        let (mut session, _scene) = scene_session();
        session.handle(Command::AddClass("car".into())).unwrap();
        capture_n(&mut session, "car", 3).await;

        assert_eq!(session.store().record("car").unwrap().example_count, 3);
        assert!(session.store().is_consistent());
        let events = session.take_events();
        assert!(events.contains(&Event::ExampleCaptured {
            label: "car".into(),
            count: 3
        }));
        assert_eq!(events.last(), Some(&Event::CaptureStopped("car".into())));
        assert!(!session.step().await.unwrap());
    }

    #[tokio::test]
    async fn switching_capture_label_discards_the_previous_tick() {
        let gate = GatedEmbedder::new(D);
        let mut session = session_with(gate.clone(), MemoryStorage::new());
        session.handle(Command::AddClass("car".into())).unwrap();
        session.handle(Command::AddClass("bike".into())).unwrap();

        session.handle(Command::StartCapture("car".into())).unwrap();
        let car_tick = session.issue_capture().unwrap().unwrap();
        session.take_events();

        session.handle(Command::StartCapture("bike".into())).unwrap();
        assert_eq!(
            session.take_events(),
            vec![
                Event::CaptureStopped("car".into()),
                Event::CaptureStarted("bike".into())
            ]
        );

        gate.release(CAR.to_vec());
        assert!(session.settle(car_tick.await).unwrap().is_none());
        assert_eq!(session.store().record("car").unwrap().example_count, 0);

        let bike_tick = session.issue_capture().unwrap().unwrap();
        gate.release(BIKE.to_vec());
        session.settle(bike_tick.await).unwrap();
        assert_eq!(session.store().record("bike").unwrap().example_count, 1);
        assert_eq!(session.store().classifier().example_count("car"), 0);
        assert_eq!(gate.pending(), 0);
    }

    #[tokio::test]
    async fn capture_failure_stops_and_surfaces() {
        let (mut session, scene) = scene_session();
        session.handle(Command::AddClass("car".into())).unwrap();
        session.handle(Command::StartCapture("car".into())).unwrap();
        scene.fail("lens covered");

        let err = session.step().await.unwrap_err();
        assert!(matches!(err, GlanceError::ExtractionFailure(_)));
        assert!(!session.capture().is_capturing());
        assert!(session
            .take_events()
            .contains(&Event::CaptureStopped("car".into())));
        assert!(!session.step().await.unwrap());
    }

    #[tokio::test]
    async fn capture_requires_training_mode_and_known_label() {
        let (mut session, _scene) = trained_session().await;
        assert!(matches!(
            session.handle(Command::StartCapture("truck".into())),
            Err(GlanceError::UnknownLabel(_))
        ));

        session.handle(Command::SwitchMode(Mode::Recognition)).unwrap();
        assert!(matches!(
            session.handle(Command::StartCapture("car".into())),
            Err(GlanceError::CameraBusy(_))
        ));
        assert!(!session.capture().is_capturing());
    }

    #[tokio::test]
    async fn deleting_the_capturing_class_stops_capture() {
        let (mut session, _scene) = scene_session();
        session.handle(Command::AddClass("car".into())).unwrap();
        session.handle(Command::StartCapture("car".into())).unwrap();
        session.step().await.unwrap();

        session.handle(Command::DeleteClass("car".into())).unwrap();
        assert!(!session.capture().is_capturing());
        assert_eq!(session.store().classifier().class_count(), 0);
        assert!(session.store().is_consistent());
    }

    #[tokio::test]
    async fn recognition_without_classes_renders_not_trained() {
        let (mut session, _scene) = scene_session();
        let err = session
            .handle(Command::SwitchMode(Mode::Recognition))
            .unwrap_err();
        assert!(matches!(err, GlanceError::NoTrainedClasses));
        assert_eq!(session.state().mode, Mode::Recognition);
        assert!(!session.recognition().is_running());
        assert_eq!(session.view().tone, Tone::NotTrained);
        assert!(!session.step().await.unwrap());
    }

    #[tokio::test]
    async fn recognition_renders_readings() {
        let (mut session, scene) = trained_session().await;
        session.handle(Command::SwitchMode(Mode::Recognition)).unwrap();

        scene.show(vec![0.9, 0.1, 0.0, 0.0]);
        assert!(session.step().await.unwrap());
        assert_eq!(session.view().overlay, "car (100%)");
        assert_eq!(session.view().tone, Tone::HighConfidence);

        scene.show(BIKE.to_vec());
        session.step().await.unwrap();
        assert_eq!(session.view().status, "Last: bike (100%)");

        let readings: Vec<_> = session
            .take_events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Recognized(reading) => Some(reading.label),
                _ => None,
            })
            .collect();
        assert_eq!(readings, vec!["car", "bike"]);
    }

    #[tokio::test]
    async fn recognition_skips_failed_frames() {
        let (mut session, scene) = trained_session().await;
        session.handle(Command::SwitchMode(Mode::Recognition)).unwrap();

        scene.fail("motion blur");
        assert!(session.step().await.unwrap());
        assert!(session.recognition().is_running());

        scene.show(CAR.to_vec());
        session.step().await.unwrap();
        assert_eq!(session.view().overlay, "car (100%)");
    }

    #[tokio::test]
    async fn stopping_discards_in_flight_prediction() {
        let (mut session, scene) = trained_session().await;
        session.handle(Command::SwitchMode(Mode::Recognition)).unwrap();
        scene.show(CAR.to_vec());

        let embedding = session.issue_recognition().unwrap();
        let prediction = session.settle(embedding.await).unwrap().unwrap();

        session.handle(Command::SwitchMode(Mode::Training)).unwrap();
        assert!(session.view().is_neutral());

        assert!(session.settle(prediction.await).unwrap().is_none());
        assert!(session.view().is_neutral());
        assert!(!session
            .take_events()
            .iter()
            .any(|event| matches!(event, Event::Recognized(_))));
    }

    #[tokio::test]
    async fn stopping_discards_in_flight_embedding() {
        let gate = GatedEmbedder::new(D);
        let mut session = session_with(gate.clone(), MemoryStorage::new());
        session.handle(Command::AddClass("car".into())).unwrap();
        session.handle(Command::StartCapture("car".into())).unwrap();
        let tick = session.issue_capture().unwrap().unwrap();
        gate.release(CAR.to_vec());
        session.settle(tick.await).unwrap();

        session.handle(Command::SwitchMode(Mode::Recognition)).unwrap();
        let embedding = session.issue_recognition().unwrap();
        session.handle(Command::SwitchMode(Mode::Training)).unwrap();

        gate.release(CAR.to_vec());
        assert!(session.settle(embedding.await).unwrap().is_none());
        assert!(session.view().is_neutral());
    }

    #[tokio::test]
    async fn save_and_load_round_trip_through_storage() {
        let (mut session, _scene) = trained_session().await;
        session.handle(Command::Save).unwrap();
        assert_eq!(session.storage().writes(), 1);
        let dataset = session.store().dataset();

        session.handle(Command::DeleteClass("bike".into())).unwrap();
        session.handle(Command::Load).unwrap();
        assert_eq!(session.store().dataset(), dataset);
        assert!(session.store().is_consistent());
        assert!(session.take_events().contains(&Event::Loaded {
            classes: 2,
            examples: 6
        }));
    }

    #[tokio::test]
    async fn empty_save_writes_nothing() {
        let (mut session, _scene) = scene_session();
        session.handle(Command::AddClass("car".into())).unwrap();
        let err = session.handle(Command::Save).unwrap_err();
        assert!(matches!(err, GlanceError::EmptyDataset));
        assert_eq!(session.storage().writes(), 0);
    }

    #[tokio::test]
    async fn corrupt_record_leaves_state_unchanged() {
        let mut storage = MemoryStorage::new();
        let record = r#"{"classes":{"car":{"name":"car","exampleCount":1}},"dataset":{"car":[1.0,2.0,3.0]}}"#;
        storage.put(STORAGE_KEY, record).unwrap();

        let scene = SceneEmbedder::new(D);
        let mut session = session_with(scene.clone(), storage);
        assert!(session.store().is_empty());
        assert!(session.take_events().iter().any(|event| matches!(
            event,
            Event::Notice {
                severity: Severity::Notice,
                ..
            }
        )));

        session.handle(Command::AddClass("bike".into())).unwrap();
        scene.show(BIKE.to_vec());
        capture_n(&mut session, "bike", 2).await;
        let dataset = session.store().dataset();

        let err = session.handle(Command::Load).unwrap_err();
        assert!(matches!(err, GlanceError::CorruptRecord(_)));
        assert_eq!(session.store().dataset(), dataset);
        assert!(session.store().is_consistent());
    }

    #[tokio::test]
    async fn open_restores_the_stored_model() {
        let (mut trained, _scene) = trained_session().await;
        trained.handle(Command::Save).unwrap();
        let storage = trained.storage().clone();

        let mut session = session_with(SceneEmbedder::new(D), storage);
        assert_eq!(session.store().record("car").unwrap().example_count, 3);
        assert_eq!(session.store().trained_class_count(), 2);
        assert!(session.take_events().contains(&Event::Loaded {
            classes: 2,
            examples: 6
        }));
    }

    #[tokio::test]
    async fn clear_empties_store_and_storage() {
        let (mut session, _scene) = trained_session().await;
        session.handle(Command::Save).unwrap();
        session.handle(Command::SwitchMode(Mode::Recognition)).unwrap();

        session.handle(Command::Clear).unwrap();
        assert!(session.store().is_empty());
        assert_eq!(session.store().classifier().class_count(), 0);
        assert_eq!(session.storage().get(STORAGE_KEY).unwrap(), None);
        assert!(!session.recognition().is_running());
        assert_eq!(session.view().tone, Tone::NotTrained);
    }

    #[tokio::test]
    async fn flip_reacquires_camera_before_continuing() {
        let (mut session, _scene) = scene_session();
        session.handle(Command::AddClass("car".into())).unwrap();
        session.handle(Command::StartCapture("car".into())).unwrap();

        session.handle(Command::FlipCamera).unwrap();
        assert_eq!(session.state().facing, Facing::User);
        assert_eq!(session.camera().releases, 1);
        assert_eq!(
            session.camera().acquisitions,
            vec![Facing::Environment, Facing::User]
        );

        assert!(session.step().await.unwrap());
        assert_eq!(session.store().record("car").unwrap().example_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn event_loop_captures_on_the_timer() {
        let (mut session, _scene) = scene_session();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let driver = async move {
            commands.send(Command::AddClass("car".into())).unwrap();
            commands.send(Command::StartCapture("car".into())).unwrap();
            time::sleep(Duration::from_millis(350)).await;
            commands.send(Command::StopCapture).unwrap();
            time::sleep(Duration::from_millis(300)).await;
            commands.send(Command::Shutdown).unwrap();
        };
        tokio::join!(session.run(command_rx, event_tx), driver);

        let count = session.store().record("car").unwrap().example_count;
        assert_eq!(count, 3);
        assert!(session.store().is_consistent());
        assert_eq!(session.camera().acquired, None);

        let mut captured = 0;
        while let Ok(event) = event_rx.try_recv() {
            if matches!(event, Event::ExampleCaptured { .. }) {
                captured += 1;
            }
        }
        assert_eq!(captured, count);
    }

    #[tokio::test(start_paused = true)]
    async fn first_capture_tick_waits_one_period() {
        let (mut session, _scene) = scene_session();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (event_tx, _event_rx) = mpsc::unbounded_channel();

        let driver = async move {
            commands.send(Command::AddClass("car".into())).unwrap();
            time::sleep(Duration::from_millis(30)).await;
            commands.send(Command::StartCapture("car".into())).unwrap();
            time::sleep(Duration::from_millis(90)).await;
            commands.send(Command::StopCapture).unwrap();
            commands.send(Command::StartCapture("car".into())).unwrap();
            time::sleep(Duration::from_millis(150)).await;
            commands.send(Command::Shutdown).unwrap();
        };
        tokio::join!(session.run(command_rx, event_tx), driver);

        // The first start is stopped before its 130ms tick; the restart ticks once, at 220ms.
        assert_eq!(session.store().record("car").unwrap().example_count, 1);
    }

    #[tokio::test]
    async fn deleting_trained_classes_while_recognizing() {
        let (mut session, scene) = trained_session().await;
        session.handle(Command::SwitchMode(Mode::Recognition)).unwrap();
        scene.show(CAR.to_vec());
        session.step().await.unwrap();
        assert_eq!(session.view().overlay, "car (100%)");

        session.handle(Command::DeleteClass("car".into())).unwrap();
        assert!(session.recognition().is_running());
        assert!(session.view().is_neutral());
        session.step().await.unwrap();
        assert_eq!(session.view().overlay, "bike (100%)");

        session.handle(Command::DeleteClass("bike".into())).unwrap();
        assert!(!session.recognition().is_running());
        assert_eq!(session.view().tone, Tone::NotTrained);
        assert!(!session.step().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn event_loop_recognizes_and_reports_notices() {
        let (mut session, scene) = trained_session().await;
        scene.show(CAR.to_vec());
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let driver = async move {
            commands.send(Command::AddClass("car".into())).unwrap();
            commands.send(Command::SwitchMode(Mode::Recognition)).unwrap();
            time::sleep(Duration::from_millis(100)).await;
            commands.send(Command::SwitchMode(Mode::Training)).unwrap();
            time::sleep(Duration::from_millis(100)).await;
        };
        tokio::join!(session.run(command_rx, event_tx), driver);

        let events: Vec<Event> = std::iter::from_fn(|| event_rx.try_recv().ok()).collect();
        assert!(events.iter().any(|event| matches!(
            event,
            Event::Notice { message, .. } if message.contains("already exists")
        )));
        assert!(events.iter().any(|event| matches!(
            event,
            Event::Recognized(reading) if reading.label == "car"
        )));
        assert!(session.view().is_neutral());
        assert!(!session.recognition().is_running());
    }
}
