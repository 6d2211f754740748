pub mod combiner;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod locator;
pub mod notifier;
pub mod pipeline;
mod progress;
pub mod template;
pub mod transcoder;

pub use combiner::{combine_segments, CombineError, CombineReport, CombineResult};
pub use config::{
    load_rip_config, DisplaySection, HttpSection, NotificationSection, PathsSection, RipConfig,
    TranscoderSection,
};
pub use error::{ConfigError, Result};
pub use fetcher::{
    segment_file_name, DownloadReport, FetchError, FetchOutcome, FetchResult, HttpSegmentSource,
    SegmentFetcher, SegmentSource, Termination,
};
pub use locator::{RangeError, SegmentCandidate, SegmentLocator, SegmentRange};
pub use notifier::{
    CompletionNotifier, Notification, NotifyError, NotifyResult, Priority, PushoverCredentials,
    PushoverNotifier,
};
pub use pipeline::{
    JobPaths, JobRequest, NotificationStatus, Pipeline, PipelineError, PipelineResult, RunReport,
    Stage, StageStatus, TranscodeReport,
};
pub use template::{TemplateError, UrlTemplate};
pub use transcoder::{
    CommandExecutor, FfmpegTranscoder, SystemCommandExecutor, TranscodeError, TranscodeResult,
};
