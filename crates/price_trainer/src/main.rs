//! Autoprice CLI
//!
//! Splits raw listing files, tracks schema drift, prepares leakage-safe
//! encoded splits, trains and publishes price models and replays a pinned
//! model on prediction requests.

use anyhow::{Context, Result};
use autoprice_core::model::GbdtModel;
use autoprice_core::{PipelineConfig, SchemaEngine};
use autoprice_inference::{InferenceReplayer, ModelPin};
use autoprice_registry::{ArtifactKind, ArtifactRegistry, ArtifactStore, ArtifactVersion, SledArtifactStore};
use autoprice_trainer::{
    split_raw, train_and_publish, write_encoded, Dataset, RawSplits, SchemaTracker, SplitPreparer,
};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "autoprice")]
#[command(author = "Autoprice Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Leakage-safe car price pipeline", long_about = None)]
struct Cli {
    /// Pipeline configuration (TOML); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Artifact store directory
    #[arg(short, long, global = true, default_value = "artifacts")]
    store: PathBuf,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct SplitFiles {
    /// Training split CSV
    #[arg(long)]
    train: PathBuf,

    /// Validation split CSV
    #[arg(long)]
    validation: PathBuf,

    /// Test split CSV
    #[arg(long)]
    test: PathBuf,
}

impl SplitFiles {
    fn load(&self) -> Result<RawSplits> {
        let read = |path: &Path| {
            Dataset::from_csv(path)
                .map(Dataset::into_records)
                .with_context(|| format!("Failed to load {}", path.display()))
        };
        Ok(RawSplits {
            train: read(&self.train)?,
            validation: read(&self.validation)?,
            test: read(&self.test)?,
        })
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Clean a raw scrape and write stratified train/validation/test CSVs
    Split {
        /// Raw listings CSV
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory for the three split files
        #[arg(short, long, default_value = "data/splits")]
        output: PathBuf,
    },

    /// Check splits against the latest schema (bootstrapping it on first run)
    Validate {
        #[command(flatten)]
        splits: SplitFiles,
    },

    /// Impute, filter and encode the splits and publish the encoder set
    Prepare {
        #[command(flatten)]
        splits: SplitFiles,

        /// Output directory for the encoded CSVs
        #[arg(short, long, default_value = "data/encoded")]
        output: PathBuf,
    },

    /// Run the full pipeline and publish a model paired with its encoders
    Train {
        #[command(flatten)]
        splits: SplitFiles,
    },

    /// Score a JSON array of listings with a pinned model
    Predict {
        /// Model version, e.g. `model:v3`
        #[arg(short, long)]
        model: ArtifactVersion,

        /// Encoder set version; must match the one the model was trained with
        #[arg(short, long)]
        encoder: Option<ArtifactVersion>,

        /// JSON file with an array of listings
        #[arg(short, long)]
        input: PathBuf,
    },

    /// List published artifact versions
    Versions,
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    for warning in config.validate().context("Invalid configuration")? {
        warn!("{}", warning);
    }
    Ok(config)
}

fn open_registry(path: &Path) -> Result<ArtifactRegistry<SledArtifactStore>> {
    let store = SledArtifactStore::open(path)
        .with_context(|| format!("Failed to open artifact store {}", path.display()))?;
    Ok(ArtifactRegistry::new(store))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    info!("Autoprice v{}", env!("CARGO_PKG_VERSION"));
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Split { input, output } => {
            let raw = Dataset::from_csv(&input).context("Failed to load raw listings")?;
            let splits = split_raw(&raw.records, &config).context("Failed to split listings")?;

            std::fs::create_dir_all(&output)
                .with_context(|| format!("Failed to create {}", output.display()))?;
            for (name, records) in splits.named() {
                let path = output.join(format!("{name}.csv"));
                Dataset::new(records.to_vec())
                    .to_csv(&path)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!("Wrote {} rows to {}", records.len(), path.display());
            }
        }

        Command::Validate { splits } => {
            let raw = splits.load()?;
            let registry = open_registry(&cli.store)?;
            let tracker = SchemaTracker::new(SchemaEngine::new(config.schema.clone()), &registry);
            let tracking = tracker
                .track(
                    &raw.train,
                    &[("validation", raw.validation.as_slice()), ("test", raw.test.as_slice())],
                )
                .context("Schema tracking failed")?;
            registry.store().flush()?;
            print_json(&tracking)?;
        }

        Command::Prepare { splits, output } => {
            let raw = splits.load()?;
            let registry = open_registry(&cli.store)?;
            let run_id = uuid::Uuid::new_v4().to_string();
            let prepared = SplitPreparer::new(&config, &registry)?
                .prepare(&raw, &run_id)
                .context("Preparation failed")?;
            registry.store().flush()?;

            std::fs::create_dir_all(&output)
                .with_context(|| format!("Failed to create {}", output.display()))?;
            for (name, split) in [
                ("train", &prepared.train),
                ("validation", &prepared.validation),
                ("test", &prepared.test),
            ] {
                write_encoded(output.join(format!("{name}.csv")), split)?;
            }
            print_json(&json!({
                "encoder_version": prepared.encoder_version,
                "report": prepared.report,
            }))?;
        }

        Command::Train { splits } => {
            let raw = splits.load()?;
            let registry = open_registry(&cli.store)?;
            let run_id = uuid::Uuid::new_v4().to_string();
            info!("Starting run {}", run_id);

            let run = train_and_publish(&raw, &config, &registry, &run_id).context("Training failed")?;
            registry.store().flush()?;
            if run.schema.total_anomalies() > 0 {
                warn!("{} schema anomalies reported for run {}", run.schema.total_anomalies(), run_id);
            }
            print_json(&run)?;
        }

        Command::Predict { model, encoder, input } => {
            if model.kind != ArtifactKind::Model {
                anyhow::bail!("{model} is not a model version");
            }
            let registry = open_registry(&cli.store)?;
            let pin = ModelPin { model, encoder };
            let replayer = InferenceReplayer::<GbdtModel>::load(&registry, pin)
                .with_context(|| format!("Failed to load {model}"))?;

            let requests = Dataset::from_json(&input).context("Failed to load prediction requests")?;
            let predictions = replayer.predict(&requests.records).context("Prediction failed")?;
            print_json(&json!({
                "model": replayer.model_version(),
                "encoder": replayer.encoder_version(),
                "predictions": predictions,
            }))?;
        }

        Command::Versions => {
            let registry = open_registry(&cli.store)?;
            let mut listing = serde_json::Map::new();
            for kind in ArtifactKind::ALL {
                let versions: Vec<String> = registry
                    .store()
                    .versions(kind)?
                    .into_iter()
                    .map(|v| v.to_string())
                    .collect();
                listing.insert(kind.name().to_string(), json!(versions));
            }
            print_json(&listing)?;
        }
    }

    Ok(())
}
