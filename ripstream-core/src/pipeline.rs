//! Sequences download, combine, transcode and notify for one job.
//!
//! Every stage is skipped when its output already exists on disk; existence
//! is the only resumption signal. Nothing is rolled back when a later stage
//! fails.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

use crate::combiner::{combine_segments, CombineError, CombineReport};
use crate::config::RipConfig;
use crate::fetcher::{
    DownloadReport, FetchError, HttpSegmentSource, SegmentFetcher, SegmentSource,
};
use crate::locator::{SegmentLocator, SegmentRange};
use crate::notifier::{
    CompletionNotifier, Notification, NotifyError, NotifyResult, Priority, PushoverNotifier,
};
use crate::template::UrlTemplate;
use crate::transcoder::{CommandExecutor, FfmpegTranscoder, TranscodeError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid job name {name:?}: {reason}")]
    InvalidJobName { name: String, reason: &'static str },
    #[error("no URL template given for job '{job}' and {raw_dir} does not exist yet")]
    MissingTemplate { job: String, raw_dir: PathBuf },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Combine(#[from] CombineError),
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Filesystem layout of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobPaths {
    pub root: PathBuf,
    pub raw_dir: PathBuf,
    pub combined: PathBuf,
    pub output: PathBuf,
}

impl JobPaths {
    pub fn new(config: &RipConfig, name: &str) -> PipelineResult<Self> {
        validate_job_name(name)?;
        let root = config.paths.working_root.join(name);
        Ok(Self {
            raw_dir: root.join(&config.paths.raw_dir_name),
            combined: root.join(format!("{name}.{}", config.paths.segment_extension)),
            output: root.join(format!("{name}.mp4")),
            root,
        })
    }
}

fn validate_job_name(name: &str) -> PipelineResult<()> {
    let invalid = |reason| PipelineError::InvalidJobName {
        name: name.to_string(),
        reason,
    };
    if name.trim().is_empty() {
        return Err(invalid("must not be empty"));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => return Err(invalid("must be a single directory name")),
    }
    if name.contains('/') || name.contains('\\') {
        return Err(invalid("must not contain path separators"));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct JobRequest {
    pub name: String,
    pub template: Option<UrlTemplate>,
    pub range: Option<SegmentRange>,
    pub notify: bool,
    pub priority: Priority,
}

impl JobRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: None,
            range: None,
            notify: true,
            priority: Priority::Normal,
        }
    }

    pub fn with_template(mut self, template: UrlTemplate, range: SegmentRange) -> Self {
        self.template = Some(template);
        self.range = Some(range);
        self
    }

    pub fn with_notification(mut self, notify: bool, priority: Priority) -> Self {
        self.notify = notify;
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Downloading,
    Combining,
    Transcoding,
    Notifying,
    Done,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus<T> {
    Completed(T),
    Skipped { existing: PathBuf },
}

impl<T> StageStatus<T> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, StageStatus::Skipped { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscodeReport {
    pub input: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotificationStatus {
    Sent,
    Disabled,
    MissingCredentials { path: PathBuf },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub job: String,
    pub working_dir: PathBuf,
    pub output: PathBuf,
    pub download: StageStatus<DownloadReport>,
    pub combine: StageStatus<CombineReport>,
    pub transcode: StageStatus<TranscodeReport>,
    pub notification: NotificationStatus,
    /// Stages that actually ran, in order, ending with `Done`.
    pub stages: Vec<Stage>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Pipeline {
    config: Arc<RipConfig>,
    source: Arc<dyn SegmentSource>,
    transcoder: FfmpegTranscoder,
    notifier: Arc<dyn CompletionNotifier>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("transcoder", &self.transcoder)
            .finish()
    }
}

impl Pipeline {
    pub fn new(config: RipConfig) -> PipelineResult<Self> {
        let source = Arc::new(HttpSegmentSource::new(&config.http)?);
        let transcoder = FfmpegTranscoder::new(config.transcoder.ffmpeg.clone(), None);
        let notifier = notifier_or_unavailable(PushoverNotifier::new(&config.notification));
        Ok(Self {
            config: Arc::new(config),
            source,
            transcoder,
            notifier,
        })
    }

    pub fn with_source(mut self, source: Arc<dyn SegmentSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.transcoder = FfmpegTranscoder::new(self.config.transcoder.ffmpeg.clone(), Some(executor));
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn CompletionNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &RipConfig {
        &self.config
    }

    pub fn paths(&self, job: &str) -> PipelineResult<JobPaths> {
        JobPaths::new(&self.config, job)
    }

    pub async fn run(&self, job: &JobRequest) -> PipelineResult<RunReport> {
        let started_at = Utc::now();
        let paths = self.paths(&job.name)?;
        let mut stages = Vec::new();

        let download = self.download_stage(job, &paths, &mut stages).await?;
        let combine = self.combine_stage(&paths, &mut stages).await?;
        let transcode = self.transcode_stage(&paths, &mut stages).await?;
        let notification = self.notify_stage(job, &mut stages).await;
        advance(&mut stages, Stage::Done);

        Ok(RunReport {
            job: job.name.clone(),
            working_dir: paths.root.clone(),
            output: paths.output.clone(),
            download,
            combine,
            transcode,
            notification,
            stages,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn download_stage(
        &self,
        job: &JobRequest,
        paths: &JobPaths,
        stages: &mut Vec<Stage>,
    ) -> PipelineResult<StageStatus<DownloadReport>> {
        if is_dir(&paths.raw_dir).await {
            info!("'{}' directory exists. Skipping download.", paths.raw_dir.display());
            return Ok(StageStatus::Skipped {
                existing: paths.raw_dir.clone(),
            });
        }
        let template = job
            .template
            .clone()
            .ok_or_else(|| PipelineError::MissingTemplate {
                job: job.name.clone(),
                raw_dir: paths.raw_dir.clone(),
            })?;
        let range = job.range.unwrap_or(SegmentRange::unbounded(0));

        advance(stages, Stage::Downloading);
        info!(template = %template, range = ?range, "downloading segments");
        let fetcher = SegmentFetcher::new(
            Arc::clone(&self.source),
            self.config.paths.index_width,
            &self.config.paths.segment_extension,
        )
        .with_progress(self.config.display.show_progress);
        let report = fetcher
            .download(SegmentLocator::new(template, range), &paths.raw_dir)
            .await?;
        Ok(StageStatus::Completed(report))
    }

    async fn combine_stage(
        &self,
        paths: &JobPaths,
        stages: &mut Vec<Stage>,
    ) -> PipelineResult<StageStatus<CombineReport>> {
        if exists(&paths.combined).await {
            info!("'{}' already exists. Skipping.", paths.combined.display());
            return Ok(StageStatus::Skipped {
                existing: paths.combined.clone(),
            });
        }
        advance(stages, Stage::Combining);
        let report = combine_segments(
            &paths.raw_dir,
            &paths.combined,
            &self.config.paths.segment_extension,
            self.config.display.show_progress,
        )
        .await?;
        Ok(StageStatus::Completed(report))
    }

    async fn transcode_stage(
        &self,
        paths: &JobPaths,
        stages: &mut Vec<Stage>,
    ) -> PipelineResult<StageStatus<TranscodeReport>> {
        if exists(&paths.output).await {
            info!("'{}' already exists. Skipping.", paths.output.display());
            return Ok(StageStatus::Skipped {
                existing: paths.output.clone(),
            });
        }
        advance(stages, Stage::Transcoding);
        self.transcoder
            .transcode(&paths.combined, &paths.output)
            .await?;
        Ok(StageStatus::Completed(TranscodeReport {
            input: paths.combined.clone(),
            output: paths.output.clone(),
        }))
    }

    /// Never fails: delivery problems are logged and reported.
    async fn notify_stage(&self, job: &JobRequest, stages: &mut Vec<Stage>) -> NotificationStatus {
        if !job.notify {
            return NotificationStatus::Disabled;
        }
        advance(stages, Stage::Notifying);
        let notification =
            Notification::finished(&job.name, &self.config.notification.title, job.priority);
        match self.notifier.send(&notification).await {
            Ok(()) => NotificationStatus::Sent,
            Err(NotifyError::MissingCredentials { path }) => {
                warn!(
                    "Create a {} file if you want to receive push notifications via Pushover.",
                    path.display()
                );
                NotificationStatus::MissingCredentials { path }
            }
            Err(err) => {
                warn!(error = %err, "failed to send completion notification");
                NotificationStatus::Failed {
                    error: err.to_string(),
                }
            }
        }
    }
}

fn advance(stages: &mut Vec<Stage>, next: Stage) {
    let from = stages.last().copied().unwrap_or(Stage::Idle);
    tracing::debug!(from = ?from, to = ?next, "pipeline stage");
    stages.push(next);
}

/// Stands in for the Pushover client when it cannot be built; every send
/// fails, which the notify stage reports without failing the run.
struct UnavailableNotifier {
    reason: String,
}

#[async_trait::async_trait]
impl CompletionNotifier for UnavailableNotifier {
    async fn send(&self, _notification: &Notification) -> NotifyResult<()> {
        Err(NotifyError::Network(self.reason.clone()))
    }
}

fn notifier_or_unavailable(
    built: NotifyResult<PushoverNotifier>,
) -> Arc<dyn CompletionNotifier> {
    match built {
        Ok(notifier) => Arc::new(notifier),
        Err(err) => {
            warn!(error = %err, "notifications unavailable");
            Arc::new(UnavailableNotifier {
                reason: err.to_string(),
            })
        }
    }
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

async fn exists(path: &Path) -> bool {
    fs::metadata(path).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_paths_follow_layout() {
        let mut config = RipConfig::default();
        config.paths.working_root = PathBuf::from("/data");
        let paths = JobPaths::new(&config, "S01E01 - Test").unwrap();
        assert_eq!(paths.root, PathBuf::from("/data/S01E01 - Test"));
        assert_eq!(
            paths.raw_dir,
            PathBuf::from("/data/S01E01 - Test/raw-ts-videos")
        );
        assert_eq!(
            paths.combined,
            PathBuf::from("/data/S01E01 - Test/S01E01 - Test.ts")
        );
        assert_eq!(
            paths.output,
            PathBuf::from("/data/S01E01 - Test/S01E01 - Test.mp4")
        );
    }

    #[tokio::test]
    async fn unbuildable_notifier_fails_sends_only() {
        let notifier = notifier_or_unavailable(Err(NotifyError::Network(
            "tls backend unavailable".into(),
        )));

        let err = notifier
            .send(&Notification::finished("job", "title", Priority::Normal))
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "notification request failed: tls backend unavailable"
        );
    }

    #[test]
    fn stage_trace_records_entered_stages() {
        let mut stages = Vec::new();
        advance(&mut stages, Stage::Combining);
        advance(&mut stages, Stage::Done);
        assert_eq!(stages, vec![Stage::Combining, Stage::Done]);
    }

    #[test]
    fn job_names_must_be_plain_directory_names() {
        let config = RipConfig::default();
        for name in ["", "   ", ".", "..", "a/b", "../escape", "/abs"] {
            assert!(
                matches!(
                    JobPaths::new(&config, name),
                    Err(PipelineError::InvalidJobName { .. })
                ),
                "{name:?} should be rejected"
            );
        }
        assert!(JobPaths::new(&config, "Show.S01E01").is_ok());
    }
}
