use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use glance::classifier::KnnClassifier;
use glance::config::Settings;
use glance::detector::PresenceDetector;
use glance::embedding::{EmbeddingSource, Facing, FrameSource};
use glance::feed::{FeatureFeed, FeatureFrameEmbedder};
use glance::persistence::PersistenceCodec;
use glance::recognition::Tone;
use glance::session::{Command, Event, Mode, Session};
use glance::storage::{LmdbStorage, ModelStorage};
use glance::GlanceError;

type FeedSession<R> = Session<FeatureFeed<R>, FeatureFrameEmbedder, KnnClassifier, LmdbStorage>;

#[derive(Parser)]
#[command(name = "glance")]
#[command(version = "0.1")]
#[command(about = "A teachable image classifier over feature vectors", long_about = None)]
struct Cli {
    /// Log at debug level unless GLANCE_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored classes and their example counts
    Classes,
    /// Capture every feature frame from stdin into a class, then save
    Capture { label: String },
    /// Print one reading per feature frame from stdin
    Recognize,
    /// Report whether a class is present in each feature frame from stdin
    Detect {
        label: String,
        /// Exported model record to use instead of the stored one
        #[arg(long)]
        model: Option<PathBuf>,
    },
    /// Delete a class from the stored model
    Delete { label: String },
    /// Print the stored model record
    Export,
    /// Validate and store an exported model record
    Import { file: PathBuf },
    /// Remove the stored model
    Clear,
    /// Print the effective settings
    Config,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "glance=debug" } else { "glance=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("GLANCE_LOG").unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(io::stderr)
        .init();
}

fn open_storage(settings: &Settings) -> Result<LmdbStorage> {
    LmdbStorage::open(&settings.path)
        .with_context(|| format!("Failed to open model storage at {}", settings.path.display()))
}

fn stored_record(settings: &Settings, storage: &LmdbStorage) -> Result<String> {
    storage
        .get(&settings.storage_key)?
        .with_context(|| format!("No saved model under '{}'", settings.storage_key))
}

fn open_session<R: BufRead>(settings: &Settings, reader: R) -> Result<FeedSession<R>> {
    let mut session = Session::new(
        settings,
        FeatureFeed::from_reader(reader, settings.dimensions),
        FeatureFrameEmbedder::new(settings.dimensions),
        KnnClassifier::new(settings.neighbors),
        open_storage(settings)?,
    )?;
    session.open()?;
    report(&mut session)?;
    Ok(session)
}

/// Prints pending session events as JSON lines.
fn report<R: BufRead>(session: &mut FeedSession<R>) -> Result<()> {
    for event in session.take_events() {
        let line = match event {
            Event::ExampleCaptured { label, count } => {
                serde_json::json!({ "captured": label, "exampleCount": count })
            }
            Event::Recognized(reading) => serde_json::json!({
                "label": reading.label,
                "confidence": reading.confidence,
                "percent": reading.percent,
                "confident": reading.tone == Tone::HighConfidence,
            }),
            Event::Saved { classes, examples } => {
                serde_json::json!({ "saved": { "classes": classes, "examples": examples } })
            }
            Event::Loaded { classes, examples } => {
                debug!(classes, examples, "stored model loaded");
                continue;
            }
            Event::Notice { severity, message } => {
                warn!(?severity, "{}", message);
                continue;
            }
            other => {
                debug!(event = ?other, "session event");
                continue;
            }
        };
        println!("{}", serde_json::to_string(&line)?);
    }
    Ok(())
}

/// Steps the session until the feed runs dry.
async fn drain<R: BufRead>(session: &mut FeedSession<R>) -> Result<()> {
    loop {
        match session.step().await {
            Ok(true) => {}
            Ok(false) => break,
            Err(_) if session.camera().is_exhausted() => break,
            Err(err) => return Err(err.into()),
        }
        report(session)?;
        if session.camera().is_exhausted() {
            break;
        }
    }
    report(session)
}

fn classes_command(settings: &Settings) -> Result<()> {
    let storage = open_storage(settings)?;
    let Some(text) = storage.get(&settings.storage_key)? else {
        return Ok(());
    };
    let dataset = PersistenceCodec::new(settings.dimensions).load(&text)?;
    for (label, examples) in &dataset {
        println!(
            "{}",
            serde_json::json!({ "name": label, "exampleCount": examples.len() })
        );
    }
    Ok(())
}

async fn capture_command(settings: &Settings, label: &str) -> Result<()> {
    let mut session = open_session(settings, io::stdin().lock())?;
    match session.handle(Command::AddClass(label.to_string())) {
        Ok(()) | Err(GlanceError::DuplicateLabel(_)) => {}
        Err(err) => return Err(err.into()),
    }
    session.handle(Command::StartCapture(label.to_string()))?;
    drain(&mut session).await?;
    session.handle(Command::StopCapture)?;
    session
        .handle(Command::Save)
        .context("Failed to save the trained model")?;
    session.shutdown();
    report(&mut session)
}

async fn recognize_command(settings: &Settings) -> Result<()> {
    let mut session = open_session(settings, io::stdin().lock())?;
    session
        .handle(Command::SwitchMode(Mode::Recognition))
        .context("Recognition needs a trained model")?;
    drain(&mut session).await?;
    session.shutdown();
    Ok(())
}

async fn detect_command(settings: &Settings, label: &str, model: Option<PathBuf>) -> Result<()> {
    let text = match model {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => stored_record(settings, &open_storage(settings)?)?,
    };
    let codec = PersistenceCodec::new(settings.dimensions);
    let detector = PresenceDetector::from_record(
        &text,
        &codec,
        label,
        settings.confidence_threshold,
        settings.neighbors,
    )?;

    let mut feed = FeatureFeed::from_reader(io::stdin().lock(), settings.dimensions);
    let embedder = FeatureFrameEmbedder::new(settings.dimensions);
    feed.acquire(Facing::Environment)?;

    loop {
        let frame = match feed.current_frame() {
            Ok(frame) => frame,
            Err(_) if feed.is_exhausted() => break,
            Err(GlanceError::Io(err)) => return Err(err).context("Failed to read stdin"),
            Err(err) => {
                warn!(error = %err, "frame skipped");
                continue;
            }
        };
        match embedder.embed(frame).await {
            Ok(embedding) => {
                let presence = detector.detect(embedding).await?;
                println!("{}", serde_json::to_string(&presence)?);
            }
            Err(err) => warn!(error = %err, "frame skipped"),
        }
    }
    feed.release();
    Ok(())
}

fn delete_command(settings: &Settings, label: &str) -> Result<()> {
    let mut session = open_session(settings, io::empty())?;
    session.handle(Command::DeleteClass(label.to_string()))?;
    match session.handle(Command::Save) {
        Ok(()) => {}
        Err(GlanceError::EmptyDataset) => session.handle(Command::Clear)?,
        Err(err) => return Err(err.into()),
    }
    session.shutdown();
    report(&mut session)
}

fn export_command(settings: &Settings) -> Result<()> {
    let storage = open_storage(settings)?;
    println!("{}", stored_record(settings, &storage)?);
    Ok(())
}

fn import_command(settings: &Settings, file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let codec = PersistenceCodec::new(settings.dimensions);
    let dataset = codec
        .load(&text)
        .with_context(|| format!("{} is not a valid model record", file.display()))?;

    let mut storage = open_storage(settings)?;
    storage.put(&settings.storage_key, &text)?;
    println!(
        "{}",
        serde_json::json!({
            "imported": {
                "classes": dataset.len(),
                "examples": dataset.values().map(Vec::len).sum::<usize>(),
            }
        })
    );
    Ok(())
}

fn clear_command(settings: &Settings) -> Result<()> {
    let mut storage = open_storage(settings)?;
    let removed = storage.remove(&settings.storage_key)?;
    println!("{}", serde_json::json!({ "cleared": removed }));
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_logging(args.verbose);
    let settings = Settings::load()?;

    match args.command {
        Commands::Classes => classes_command(&settings)?,
        Commands::Capture { label } => capture_command(&settings, &label).await?,
        Commands::Recognize => recognize_command(&settings).await?,
        Commands::Detect { label, model } => detect_command(&settings, &label, model).await?,
        Commands::Delete { label } => delete_command(&settings, &label)?,
        Commands::Export => export_command(&settings)?,
        Commands::Import { file } => import_command(&settings, &file)?,
        Commands::Clear => clear_command(&settings)?,
        Commands::Config => settings.print_config(),
    }
    Ok(())
}
