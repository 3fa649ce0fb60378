use anyhow::Context;
use moodlens_core::LocatorConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_INFERENCE_THREADS: usize = 2;
const DEFAULT_IDENTITY_TIMEOUT_SECS: u64 = 10;
/// Images arrive base64-encoded inside JSON, so the default body limit is generous.
const DEFAULT_MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Identity provider endpoint and credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityConfig {
    /// Project URL, e.g. `https://<project>.supabase.co`.
    pub url: String,
    /// Public anon key sent as the `apikey` header.
    pub anon_key: String,
    pub timeout: Duration,
}

/// Service configuration, loaded from an optional TOML file and `MOODLENS_*`
/// environment variables (environment wins).
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Listen address (default: 127.0.0.1:5000).
    pub bind_addr: String,
    /// HTTP worker count; `None` lets actix pick one per core.
    pub workers: Option<usize>,
    /// Directory containing the cascade and ONNX model files.
    pub model_dir: PathBuf,
    pub classifier_model_path: PathBuf,
    pub cascade_path: PathBuf,
    pub locator: LocatorConfig,
    /// ONNX Runtime intra-op threads for the classifier.
    pub inference_threads: usize,
    /// `None` when the identity provider URL or key is missing.
    pub identity: Option<IdentityConfig>,
    /// CORS origins allowed to send credentials; empty allows any origin.
    pub allowed_origins: Vec<String>,
    pub max_payload_bytes: usize,
}

/// Shape of the optional `MOODLENS_CONFIG` TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    bind_addr: Option<String>,
    workers: Option<usize>,
    model_dir: Option<PathBuf>,
    classifier_model: Option<PathBuf>,
    cascade: Option<PathBuf>,
    scale_factor: Option<f64>,
    min_neighbors: Option<usize>,
    min_face_size: Option<u32>,
    inference_threads: Option<usize>,
    supabase_url: Option<String>,
    supabase_anon_key: Option<String>,
    identity_timeout_secs: Option<u64>,
    allowed_origins: Option<Vec<String>>,
    max_payload_bytes: Option<usize>,
}

impl FileConfig {
    fn read(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }
}

impl Config {
    /// Load the TOML file named by `MOODLENS_CONFIG` (if any), then apply
    /// environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let file = match std::env::var("MOODLENS_CONFIG") {
            Ok(path) => FileConfig::read(Path::new(&path))?,
            Err(_) => FileConfig::default(),
        };
        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let model_dir = env("MOODLENS_MODEL_DIR")
            .map(PathBuf::from)
            .or(file.model_dir)
            .unwrap_or_else(moodlens_core::default_model_dir);

        let classifier_model_path = env("MOODLENS_CLASSIFIER_MODEL")
            .map(PathBuf::from)
            .or(file.classifier_model)
            .unwrap_or_else(|| model_dir.join(moodlens_core::CLASSIFIER_FILE));

        let cascade_path = env("MOODLENS_CASCADE")
            .map(PathBuf::from)
            .or(file.cascade)
            .unwrap_or_else(|| model_dir.join(moodlens_core::CASCADE_FILE));

        let defaults = LocatorConfig::default();
        let locator = LocatorConfig {
            scale_factor: env_parse(&env, "MOODLENS_SCALE_FACTOR")
                .or(file.scale_factor)
                .unwrap_or(defaults.scale_factor),
            min_neighbors: env_parse(&env, "MOODLENS_MIN_NEIGHBORS")
                .or(file.min_neighbors)
                .unwrap_or(defaults.min_neighbors),
            min_size: env_parse(&env, "MOODLENS_MIN_FACE_SIZE")
                .or(file.min_face_size)
                .unwrap_or(defaults.min_size),
        };

        let url = env("SUPABASE_URL").or(file.supabase_url);
        let anon_key = env("SUPABASE_ANON_KEY").or(file.supabase_anon_key);
        let timeout_secs = env_parse(&env, "MOODLENS_IDENTITY_TIMEOUT_SECS")
            .or(file.identity_timeout_secs)
            .unwrap_or(DEFAULT_IDENTITY_TIMEOUT_SECS);
        let identity = match (url, anon_key) {
            (Some(url), Some(anon_key)) if !url.is_empty() && !anon_key.is_empty() => {
                Some(IdentityConfig {
                    url,
                    anon_key,
                    timeout: Duration::from_secs(timeout_secs),
                })
            }
            _ => None,
        };

        let allowed_origins = env("MOODLENS_ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(String::from)
                    .collect()
            })
            .or(file.allowed_origins)
            .unwrap_or_default();

        Self {
            bind_addr: env("MOODLENS_BIND_ADDR")
                .or(file.bind_addr)
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            workers: env_parse(&env, "MOODLENS_WORKERS").or(file.workers),
            model_dir,
            classifier_model_path,
            cascade_path,
            locator,
            inference_threads: env_parse(&env, "MOODLENS_INFERENCE_THREADS")
                .or(file.inference_threads)
                .unwrap_or(DEFAULT_INFERENCE_THREADS),
            identity,
            allowed_origins,
            max_payload_bytes: env_parse(&env, "MOODLENS_MAX_PAYLOAD_BYTES")
                .or(file.max_payload_bytes)
                .unwrap_or(DEFAULT_MAX_PAYLOAD_BYTES),
        }
    }

    /// Path to the Haar cascade XML.
    pub fn cascade_path(&self) -> String {
        self.cascade_path.to_string_lossy().into_owned()
    }

    /// Path to the emotion classifier ONNX model.
    pub fn classifier_model_path(&self) -> String {
        self.classifier_model_path.to_string_lossy().into_owned()
    }
}

fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable configuration value");
            None
        }
    }
}
