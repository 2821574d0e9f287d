use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub recording: RecordingConfig,
    pub backend: BackendConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct RecordingConfig {
    /// Directory where sealed segment files are written
    pub segments_path: String,
    /// Fixed segment rotation interval in seconds
    #[serde(default = "default_segment_secs")]
    pub segment_secs: u64,
    /// Hard session cap in seconds
    #[serde(default = "default_max_session_secs")]
    pub max_session_secs: u64,
    /// How long a transient error banner stays visible, in seconds
    #[serde(default = "default_error_dismiss_secs")]
    pub error_dismiss_secs: u64,
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the summary backend
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_segment_secs() -> u64 {
    30
}

fn default_max_session_secs() -> u64 {
    30 * 60
}

fn default_error_dismiss_secs() -> u64 {
    6
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
