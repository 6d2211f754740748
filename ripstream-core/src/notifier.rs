use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::NotificationSection;

const CREDENTIALS_PROFILE: &str = "Default";
const EMERGENCY_RETRY_SECONDS: u32 = 60;
const EMERGENCY_EXPIRE_SECONDS: u32 = 3600;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification credentials not found at {path}")]
    MissingCredentials { path: PathBuf },
    #[error("invalid notification credentials in {path}: {reason}")]
    InvalidCredentials { path: PathBuf, reason: String },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("notification request failed: {0}")]
    Network(String),
    #[error("notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("notification priority must be between -2 and 2, got {0}")]
    InvalidPriority(i64),
}

impl From<reqwest::Error> for NotifyError {
    fn from(error: reqwest::Error) -> Self {
        NotifyError::Network(error.to_string())
    }
}

pub type NotifyResult<T> = Result<T, NotifyError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(into = "i8")]
pub enum Priority {
    Lowest,
    Low,
    #[default]
    Normal,
    High,
    Emergency,
}

impl Priority {
    pub fn value(self) -> i8 {
        match self {
            Priority::Lowest => -2,
            Priority::Low => -1,
            Priority::Normal => 0,
            Priority::High => 1,
            Priority::Emergency => 2,
        }
    }
}

impl From<Priority> for i8 {
    fn from(priority: Priority) -> Self {
        priority.value()
    }
}

impl TryFrom<i64> for Priority {
    type Error = NotifyError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -2 => Ok(Priority::Lowest),
            -1 => Ok(Priority::Low),
            0 => Ok(Priority::Normal),
            1 => Ok(Priority::High),
            2 => Ok(Priority::Emergency),
            other => Err(NotifyError::InvalidPriority(other)),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub priority: Priority,
}

impl Notification {
    pub fn finished(job: &str, title: &str, priority: Priority) -> Self {
        Self {
            title: title.to_string(),
            message: format!("'{job}' finished transcoding."),
            priority,
        }
    }
}

#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> NotifyResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushoverCredentials {
    pub api_token: String,
    pub user_key: String,
}

impl PushoverCredentials {
    /// Reads the `[Default]` profile of a `~/.pushoverrc` style file.
    pub fn parse(contents: &str, path: &Path) -> NotifyResult<Self> {
        let mut section: Option<&str> = None;
        let mut api_token = None;
        let mut user_key = None;
        for line in contents.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                section = Some(name.trim());
                continue;
            }
            if section != Some(CREDENTIALS_PROFILE) {
                continue;
            }
            let Some((key, value)) = line.split_once(['=', ':']) else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim() {
                "api_token" => api_token = Some(value),
                "user_key" => user_key = Some(value),
                _ => {}
            }
        }
        let missing = |key: &str| NotifyError::InvalidCredentials {
            path: path.to_path_buf(),
            reason: format!("missing `{key}` in [{CREDENTIALS_PROFILE}]"),
        };
        Ok(Self {
            api_token: api_token
                .filter(|v| !v.is_empty())
                .ok_or_else(|| missing("api_token"))?,
            user_key: user_key
                .filter(|v| !v.is_empty())
                .ok_or_else(|| missing("user_key"))?,
        })
    }

    pub async fn load(path: &Path) -> NotifyResult<Self> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(NotifyError::MissingCredentials {
                    path: path.to_path_buf(),
                })
            }
            Err(source) => {
                return Err(NotifyError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::parse(&contents, path)
    }
}

/// Push notifications through the Pushover message API. Credentials are read
/// on every send so that a file created mid-run is picked up.
#[derive(Debug, Clone)]
pub struct PushoverNotifier {
    client: Client,
    endpoint: String,
    credentials_path: PathBuf,
}

impl PushoverNotifier {
    pub fn new(config: &NotificationSection) -> NotifyResult<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            credentials_path: config.resolved_credentials_path(),
        })
    }

    pub fn credentials_path(&self) -> &Path {
        &self.credentials_path
    }
}

#[async_trait]
impl CompletionNotifier for PushoverNotifier {
    async fn send(&self, notification: &Notification) -> NotifyResult<()> {
        let credentials = PushoverCredentials::load(&self.credentials_path).await?;
        let mut form = vec![
            ("token", credentials.api_token),
            ("user", credentials.user_key),
            ("title", notification.title.clone()),
            ("message", notification.message.clone()),
            ("priority", notification.priority.to_string()),
        ];
        if notification.priority == Priority::Emergency {
            form.push(("retry", EMERGENCY_RETRY_SECONDS.to_string()));
            form.push(("expire", EMERGENCY_EXPIRE_SECONDS.to_string()));
        }

        let response = self.client.post(&self.endpoint).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        debug!(endpoint = %self.endpoint, priority = %notification.priority, "notification delivered");
        Ok(())
    }
}
