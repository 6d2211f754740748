use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::HttpSection;
use crate::locator::SegmentLocator;
use crate::progress;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("raw video files download directory already exists: {path}")]
    DirectoryExists { path: PathBuf },
    #[error("segment {index} not found at {url}")]
    NotFound { index: u64, url: String },
    #[error("failed to download segment {index} from {url}: {detail}")]
    Transport {
        index: u64,
        url: String,
        detail: String,
    },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("no segment could be downloaded starting at index {index}: {reason}")]
    NothingDownloaded { index: u64, reason: String },
    #[error("failed to build http client: {0}")]
    Client(String),
}

pub type FetchResult<T> = Result<T, FetchError>;

/// Result of retrieving a single candidate URL.
pub enum FetchOutcome {
    Fetched(Vec<u8>),
    /// The server has no segment at this index.
    EndOfSequence,
    TransportError(String),
}

impl fmt::Debug for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchOutcome::Fetched(body) => write!(f, "Fetched({} bytes)", body.len()),
            FetchOutcome::EndOfSequence => f.write_str("EndOfSequence"),
            FetchOutcome::TransportError(detail) => write!(f, "TransportError({detail})"),
        }
    }
}

#[async_trait]
pub trait SegmentSource: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchOutcome;
}

#[derive(Debug, Clone)]
pub struct HttpSegmentSource {
    client: Client,
}

impl HttpSegmentSource {
    pub fn new(config: &HttpSection) -> FetchResult<Self> {
        let mut builder = Client::builder();
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.as_str());
        }
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|err| FetchError::Client(err.to_string()))?;
        Ok(Self { client })
    }

    async fn fetch_file(&self, url: &Url) -> FetchOutcome {
        let Ok(path) = url.to_file_path() else {
            return FetchOutcome::TransportError(format!("invalid file url {url}"));
        };
        match fs::read(&path).await {
            Ok(body) => FetchOutcome::Fetched(body),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => FetchOutcome::EndOfSequence,
            Err(err) => FetchOutcome::TransportError(format!("{}: {err}", path.display())),
        }
    }
}

#[async_trait]
impl SegmentSource for HttpSegmentSource {
    async fn fetch(&self, url: &str) -> FetchOutcome {
        if let Ok(parsed) = Url::parse(url) {
            if parsed.scheme() == "file" {
                return self.fetch_file(&parsed).await;
            }
        }
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(err) => return FetchOutcome::TransportError(err.to_string()),
        };
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return FetchOutcome::EndOfSequence;
        }
        if !status.is_success() {
            return FetchOutcome::TransportError(format!("HTTP {status}"));
        }
        match response.bytes().await {
            Ok(body) => FetchOutcome::Fetched(body.to_vec()),
            Err(err) => FetchOutcome::TransportError(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    RangeExhausted,
    EndOfSequence { index: u64 },
    TransportError { index: u64, detail: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadReport {
    pub segments: usize,
    pub first_index: Option<u64>,
    pub last_index: Option<u64>,
    pub termination: Termination,
}

pub fn segment_file_name(index: u64, width: usize, extension: &str) -> String {
    format!("{index:0width$}.{extension}")
}

#[derive(Clone)]
pub struct SegmentFetcher {
    source: Arc<dyn SegmentSource>,
    index_width: usize,
    extension: String,
    show_progress: bool,
}

impl fmt::Debug for SegmentFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentFetcher")
            .field("index_width", &self.index_width)
            .field("extension", &self.extension)
            .finish()
    }
}

impl SegmentFetcher {
    pub fn new(source: Arc<dyn SegmentSource>, index_width: usize, extension: &str) -> Self {
        Self {
            source,
            index_width,
            extension: extension.to_string(),
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Downloads every candidate into a fresh `raw_dir`.
    ///
    /// Bounded ranges fail on the first missing or broken segment. Unbounded
    /// ranges stop at the first index the server does not answer with a body.
    /// When not a single segment was saved, `raw_dir` is removed again so that
    /// a later run does not take it for a finished download.
    pub async fn download(
        &self,
        locator: SegmentLocator,
        raw_dir: &Path,
    ) -> FetchResult<DownloadReport> {
        if fs::metadata(raw_dir).await.is_ok() {
            return Err(FetchError::DirectoryExists {
                path: raw_dir.to_path_buf(),
            });
        }
        fs::create_dir_all(raw_dir)
            .await
            .map_err(|source| FetchError::Io {
                path: raw_dir.to_path_buf(),
                source,
            })?;

        let range = locator.range();
        let bar = progress::counter(self.show_progress, range.len(), "Downloading…", "vids");
        let mut report = DownloadReport {
            segments: 0,
            first_index: None,
            last_index: None,
            termination: Termination::RangeExhausted,
        };
        let outcome = self.fetch_into(locator, raw_dir, &bar, &mut report).await;

        if report.segments == 0 {
            bar.abandon();
            if let Err(err) = fs::remove_dir_all(raw_dir).await {
                warn!(dir = %raw_dir.display(), error = %err, "failed to remove empty download directory");
            }
            outcome?;
            let reason = match &report.termination {
                Termination::EndOfSequence { .. } | Termination::RangeExhausted => {
                    "not found".to_string()
                }
                Termination::TransportError { detail, .. } => detail.clone(),
            };
            return Err(FetchError::NothingDownloaded {
                index: range.first(),
                reason,
            });
        }
        if let Err(err) = outcome {
            bar.abandon();
            return Err(err);
        }

        bar.finish_and_clear();
        info!(
            segments = report.segments,
            dir = %raw_dir.display(),
            "download finished"
        );
        Ok(report)
    }

    async fn fetch_into(
        &self,
        locator: SegmentLocator,
        raw_dir: &Path,
        bar: &indicatif::ProgressBar,
        report: &mut DownloadReport,
    ) -> FetchResult<()> {
        let bounded = locator.range().is_bounded();
        for candidate in locator {
            match self.source.fetch(&candidate.url).await {
                FetchOutcome::Fetched(body) => {
                    self.persist(raw_dir, candidate.index, &body).await?;
                    debug!(index = candidate.index, bytes = body.len(), url = %candidate.url, "segment saved");
                    report.segments += 1;
                    report.first_index.get_or_insert(candidate.index);
                    report.last_index = Some(candidate.index);
                    bar.inc(1);
                }
                FetchOutcome::EndOfSequence => {
                    if bounded {
                        return Err(FetchError::NotFound {
                            index: candidate.index,
                            url: candidate.url,
                        });
                    }
                    info!(index = candidate.index, url = %candidate.url, "segment not found, sequence ended");
                    report.termination = Termination::EndOfSequence {
                        index: candidate.index,
                    };
                    break;
                }
                FetchOutcome::TransportError(detail) => {
                    if bounded {
                        return Err(FetchError::Transport {
                            index: candidate.index,
                            url: candidate.url,
                            detail,
                        });
                    }
                    error!(index = candidate.index, url = %candidate.url, error = %detail, "unexpected download error, stopping");
                    report.termination = Termination::TransportError {
                        index: candidate.index,
                        detail,
                    };
                    break;
                }
            }
        }
        Ok(())
    }

    async fn persist(&self, raw_dir: &Path, index: u64, body: &[u8]) -> FetchResult<()> {
        let path = raw_dir.join(segment_file_name(index, self.index_width, &self.extension));
        let partial = path.with_extension(format!("{}.part", self.extension));
        fs::write(&partial, body)
            .await
            .map_err(|source| FetchError::Io {
                path: partial.clone(),
                source,
            })?;
        fs::rename(&partial, &path)
            .await
            .map_err(|source| FetchError::Io { path, source })
    }
}
