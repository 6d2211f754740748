use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

pub const DEFAULT_RAW_DIR_NAME: &str = "raw-ts-videos";
pub const DEFAULT_INDEX_WIDTH: usize = 5;
pub const DEFAULT_PUSHOVER_ENDPOINT: &str = "https://api.pushover.net/1/messages.json";

pub(crate) const MAX_INDEX_WIDTH: usize = 20;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RipConfig {
    pub paths: PathsSection,
    pub http: HttpSection,
    pub transcoder: TranscoderSection,
    pub notification: NotificationSection,
    pub display: DisplaySection,
}

impl RipConfig {
    pub fn validate(&self) -> Result<()> {
        if self.paths.index_width == 0 || self.paths.index_width > MAX_INDEX_WIDTH {
            return Err(ConfigError::Invalid {
                field: "paths.index_width",
                reason: format!(
                    "must be between 1 and {MAX_INDEX_WIDTH}, got {}",
                    self.paths.index_width
                ),
            });
        }
        if self.paths.raw_dir_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "paths.raw_dir_name",
                reason: "must not be empty".into(),
            });
        }
        if self.paths.segment_extension.trim().is_empty()
            || self.paths.segment_extension.contains('.')
        {
            return Err(ConfigError::Invalid {
                field: "paths.segment_extension",
                reason: format!(
                    "expected a bare extension like \"ts\", got {:?}",
                    self.paths.segment_extension
                ),
            });
        }
        if self.transcoder.ffmpeg.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "transcoder.ffmpeg",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    /// Directory that job directories are created under.
    pub working_root: PathBuf,
    pub raw_dir_name: String,
    /// Zero-padded width of raw segment file names. Keeps lexicographic and
    /// numeric order identical.
    pub index_width: usize,
    pub segment_extension: String,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            working_root: PathBuf::from("."),
            raw_dir_name: DEFAULT_RAW_DIR_NAME.to_string(),
            index_width: DEFAULT_INDEX_WIDTH,
            segment_extension: "ts".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub user_agent: Option<String>,
    pub timeout_seconds: Option<u64>,
}

impl HttpSection {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscoderSection {
    pub ffmpeg: PathBuf,
}

impl Default for TranscoderSection {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationSection {
    pub credentials_path: PathBuf,
    pub endpoint: String,
    pub title: String,
}

impl Default for NotificationSection {
    fn default() -> Self {
        Self {
            credentials_path: PathBuf::from("~/.pushoverrc"),
            endpoint: DEFAULT_PUSHOVER_ENDPOINT.to_string(),
            title: "Rip-Stream Finished".to_string(),
        }
    }
}

impl NotificationSection {
    pub fn resolved_credentials_path(&self) -> PathBuf {
        expand_home(&self.credentials_path)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DisplaySection {
    pub show_progress: bool,
}

impl Default for DisplaySection {
    fn default() -> Self {
        Self {
            show_progress: true,
        }
    }
}

pub fn load_rip_config<P: AsRef<Path>>(path: P) -> Result<RipConfig> {
    let config: RipConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

pub(crate) fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
