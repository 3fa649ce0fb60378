use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use moodlens_core::decoder;
use moodlens_core::{
    EmotionLabel, FaceLocator, HaarFaceLocator, LocatorConfig, OnnxEmotionClassifier,
    PredictionPipeline,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "moodlens", about = "moodlens emotion detection CLI")]
struct Cli {
    #[command(flatten)]
    models: ModelArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ModelArgs {
    /// Directory holding the cascade and classifier files
    #[arg(long, env = "MOODLENS_MODEL_DIR", global = true)]
    model_dir: Option<PathBuf>,
    /// Haar cascade XML (overrides --model-dir)
    #[arg(long, env = "MOODLENS_CASCADE", global = true)]
    cascade: Option<PathBuf>,
    /// Emotion classifier ONNX model (overrides --model-dir)
    #[arg(long, env = "MOODLENS_CLASSIFIER_MODEL", global = true)]
    classifier_model: Option<PathBuf>,
    /// Detection pyramid scale step
    #[arg(long, default_value_t = 1.1, global = true)]
    scale_factor: f64,
    /// Overlapping detections required to keep a face
    #[arg(long, default_value_t = 5, global = true)]
    min_neighbors: usize,
    /// Smallest face side in pixels
    #[arg(long, default_value_t = 30, global = true)]
    min_size: u32,
    /// ONNX Runtime intra-op threads
    #[arg(long, default_value_t = 2, global = true)]
    threads: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect faces and classify each one's expression
    Predict {
        /// Image file, or a `data:<mime>;base64,...` URL
        image: String,
    },
    /// Detect faces only (no classifier model needed)
    Detect {
        /// Image file, or a `data:<mime>;base64,...` URL
        image: String,
    },
    /// Print the emotion labels in model output order
    Labels,
}

impl ModelArgs {
    fn model_dir(&self) -> PathBuf {
        self.model_dir
            .clone()
            .unwrap_or_else(moodlens_core::default_model_dir)
    }

    fn cascade_path(&self) -> String {
        self.cascade
            .clone()
            .unwrap_or_else(|| self.model_dir().join(moodlens_core::CASCADE_FILE))
            .to_string_lossy()
            .into_owned()
    }

    fn classifier_path(&self) -> String {
        self.classifier_model
            .clone()
            .unwrap_or_else(|| self.model_dir().join(moodlens_core::CLASSIFIER_FILE))
            .to_string_lossy()
            .into_owned()
    }

    fn locator(&self) -> Result<HaarFaceLocator> {
        let config = LocatorConfig {
            scale_factor: self.scale_factor,
            min_neighbors: self.min_neighbors,
            min_size: self.min_size,
        };
        let path = self.cascade_path();
        tracing::debug!(path = %path, ?config, "loading face cascade");
        HaarFaceLocator::load(&path, config).context("loading face cascade")
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Predict { image } => {
            let locator = cli.models.locator()?;
            let classifier =
                OnnxEmotionClassifier::load(&cli.models.classifier_path(), cli.models.threads)
                    .context("loading emotion model")?;
            let pipeline = PredictionPipeline::new(locator, classifier);

            let results = if is_data_url(&image) {
                pipeline.run(&image)?
            } else {
                pipeline.run_bytes(&read_image(&image)?)?
            };
            tracing::info!(faces = results.len(), "prediction complete");
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Commands::Detect { image } => {
            let locator = cli.models.locator()?;
            let decoded = if is_data_url(&image) {
                decoder::decode(&image)?
            } else {
                decoder::decode_bytes(&read_image(&image)?)?
            };
            let faces = locator.locate(&decoded.gray)?;
            tracing::info!(
                faces = faces.len(),
                width = decoded.width(),
                height = decoded.height(),
                "detection complete"
            );
            println!("{}", serde_json::to_string_pretty(&faces)?);
        }
        Commands::Labels => {
            for label in EmotionLabel::ALL {
                println!("{}\t{label}", label.index());
            }
        }
    }

    Ok(())
}

fn is_data_url(input: &str) -> bool {
    input.starts_with("data:")
}

fn read_image(path: &str) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {path}"))
}
