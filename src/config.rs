use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.yaml";

/// Default store name; the collection lives at `<base>/<name>.vec`
const DEFAULT_STORE_NAME: &str = "default";
/// Default text model (384 dimensions, matches the audio default)
const DEFAULT_TEXT_MODEL: &str = "all-MiniLM-L6-v2";
/// Default number of spectral bands
const DEFAULT_AUDIO_DIMENSIONS: usize = 384;
/// Default number of search results
const DEFAULT_K: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_store_name")]
    pub name: String,

    /// Fix the vector dimensionality up front instead of taking it from
    /// the first insert
    #[serde(default)]
    pub dimensions: Option<usize>,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            name: DEFAULT_STORE_NAME.to_string(),
            dimensions: None,
        }
    }
}

/// Configuration for the text encoder
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TextEncoderSection {
    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_text_model")]
    pub model: String,
}

impl Default for TextEncoderSection {
    fn default() -> Self {
        Self {
            model: DEFAULT_TEXT_MODEL.to_string(),
        }
    }
}

/// Configuration for the audio encoder
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AudioEncoderSection {
    /// Output dimensionality; keep equal to the text model's
    #[serde(default = "default_audio_dimensions")]
    pub dimensions: usize,
}

impl Default for AudioEncoderSection {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_AUDIO_DIMENSIONS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_k")]
    pub default_k: usize,

    /// Drop hits below this similarity [-1.0, 1.0]
    #[serde(default)]
    pub min_similarity: Option<f32>,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            default_k: DEFAULT_K,
            min_similarity: None,
        }
    }
}

fn default_store_name() -> String {
    DEFAULT_STORE_NAME.to_string()
}

fn default_text_model() -> String {
    DEFAULT_TEXT_MODEL.to_string()
}

fn default_audio_dimensions() -> usize {
    DEFAULT_AUDIO_DIMENSIONS
}

fn default_k() -> usize {
    DEFAULT_K
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub text_encoder: TextEncoderSection,
    #[serde(default)]
    pub audio_encoder: AudioEncoderSection,
    #[serde(default)]
    pub search: SearchSection,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        let name = &self.store.name;
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::Invalid(format!(
                "store.name must be non-empty and use only letters, digits, '-' or '_', got '{name}'"
            )));
        }

        if self.store.dimensions == Some(0) {
            return Err(ConfigError::Invalid(
                "store.dimensions must be greater than 0".to_string(),
            ));
        }

        if self.audio_encoder.dimensions == 0 {
            return Err(ConfigError::Invalid(
                "audio_encoder.dimensions must be greater than 0".to_string(),
            ));
        }

        if let Some(min) = self.search.min_similarity {
            if !(-1.0..=1.0).contains(&min) {
                return Err(ConfigError::Invalid(format!(
                    "search.min_similarity must be between -1.0 and 1.0, got {min}"
                )));
            }
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, creating it with defaults if it
    /// does not exist.
    pub fn load_with(base_path: &Path) -> Result<Self, ConfigError> {
        std::fs::create_dir_all(base_path)?;
        let path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !path.exists() {
            log::info!("Writing default config to {}", path.display());
            write_atomic(&path, serde_yml::to_string(&Self::default())?.as_bytes())?;
        }

        let config_str = std::fs::read_to_string(&path)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let config_str = serde_yml::to_string(&self)?;
        write_atomic(&self.base_path.join(CONFIG_FILE), config_str.as_bytes())?;
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

/// Write through a temp file and rename so a crash never leaves half a config.
fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}

/// `$AUDEX_BASE_PATH`, else `~/.local/share/audex`.
pub fn default_base_path() -> Result<PathBuf, ConfigError> {
    if let Ok(path) = std::env::var("AUDEX_BASE_PATH") {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    let home = homedir::my_home()
        .map_err(|e| ConfigError::Invalid(format!("cannot resolve home directory: {e}")))?
        .ok_or_else(|| ConfigError::Invalid("home directory not found".to_string()))?;

    Ok(home.join(".local").join("share").join("audex"))
}
