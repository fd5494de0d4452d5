//! Service configuration from command-line flags and environment variables.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use super::state::ServiceSettings;

#[derive(Parser, Debug, Clone)]
#[command(name = "styletts2-server", version, about = "StyleTTS2 text-to-speech HTTP service")]
pub struct ServerConfig {
    /// Directory holding config.json and the ONNX operators
    #[arg(long, env = "MODEL_DIR", default_value = "models/styletts2")]
    pub model_dir: PathBuf,

    /// Key clients must present in the Authorization header
    #[arg(long, env = "API_KEY")]
    pub api_key: String,

    /// JSON map of voice id to reference WAV path
    #[arg(long, env = "VOICES_FILE")]
    pub voices_file: Option<PathBuf>,

    /// Directory of 3.wav, amused.wav and sleepy.wav when no voices file is given
    #[arg(long, env = "REFERENCE_DIR", default_value = "reference_audio")]
    pub reference_dir: PathBuf,

    /// Optional .npz of precomputed voice styles
    #[arg(long, env = "STYLE_ARCHIVE")]
    pub style_archive: Option<PathBuf>,

    /// Root directory for uploaded audio
    #[arg(long, env = "STORAGE_DIR", default_value = "storage")]
    pub storage_dir: PathBuf,

    /// Prefix of uploaded object keys
    #[arg(long, env = "S3_PREFIX", default_value = "styletts2-outputs")]
    pub s3_prefix: String,

    /// Externally reachable base URL used in download links
    #[arg(long, env = "PUBLIC_BASE_URL", default_value = "http://localhost:8000")]
    pub public_base_url: String,

    /// Secret for download link signatures; the API key when unset
    #[arg(long, env = "URL_SIGNING_SECRET")]
    pub url_signing_secret: Option<String>,

    /// Lifetime of download links in seconds
    #[arg(long, env = "PRESIGN_TTL_SECS", default_value_t = 3600)]
    pub presign_ttl_secs: u64,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Longest accepted request text, in characters
    #[arg(long, env = "MAX_TEXT_CHARS", default_value_t = 5000)]
    pub max_text_chars: usize,

    /// ONNX Runtime intra-op threads
    #[arg(long, env = "NUM_THREADS")]
    pub num_threads: Option<usize>,

    /// Directory for optimized ONNX graphs
    #[arg(long, env = "OPTIMIZED_MODEL_CACHE_DIR")]
    pub optimized_model_cache_dir: Option<PathBuf>,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.api_key.trim().is_empty() {
            return Err("API_KEY must not be empty".to_string());
        }
        if self.max_text_chars == 0 {
            return Err("MAX_TEXT_CHARS must be positive".to_string());
        }
        if self.presign_ttl_secs == 0 {
            return Err("PRESIGN_TTL_SECS must be positive".to_string());
        }
        if self.s3_prefix.trim_matches('/').is_empty() {
            return Err("S3_PREFIX must not be empty".to_string());
        }
        Ok(())
    }

    pub fn signing_secret(&self) -> &str {
        self.url_signing_secret.as_deref().unwrap_or(&self.api_key)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            api_key: self.api_key.clone(),
            max_text_chars: self.max_text_chars,
            key_prefix: self.s3_prefix.trim_matches('/').to_string(),
            presign_ttl: Duration::from_secs(self.presign_ttl_secs),
        }
    }
}
