use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("transcoding engine not found: {binary}")]
    EngineMissing { binary: PathBuf },
    #[error("transcoding engine failed with status {status:?}: {stderr}")]
    EngineFailed { status: Option<i32>, stderr: String },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type TranscodeResult<T> = Result<T, TranscodeError>;

#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait::async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output> {
        command.output().await
    }
}

/// Converts the combined transport stream into an MP4 container with a
/// single ffmpeg invocation using the engine's default codecs.
#[derive(Clone)]
pub struct FfmpegTranscoder {
    binary: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl fmt::Debug for FfmpegTranscoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FfmpegTranscoder")
            .field("binary", &self.binary)
            .finish()
    }
}

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<PathBuf>, executor: Option<Arc<dyn CommandExecutor>>) -> Self {
        let executor = executor.unwrap_or_else(|| Arc::new(SystemCommandExecutor));
        Self {
            binary: binary.into(),
            executor,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub async fn transcode(&self, input: &Path, output: &Path) -> TranscodeResult<()> {
        let partial = partial_output(output);
        let mut command = Command::new(&self.binary);
        command
            .kill_on_drop(true)
            .arg("-hide_banner")
            .arg("-nostdin")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg(&partial);

        info!(input = %input.display(), "Transcoding... (This could take a while...)");
        debug!(binary = %self.binary.display(), output = %partial.display(), "invoking transcoder");
        let result = self.executor.run(&mut command).await;
        let output_status = match result {
            Ok(out) if out.status.success() => Ok(()),
            Ok(out) => Err(TranscodeError::EngineFailed {
                status: out.status.code(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(TranscodeError::EngineMissing {
                    binary: self.binary.clone(),
                })
            }
            Err(source) => Err(TranscodeError::Io {
                path: self.binary.clone(),
                source,
            }),
        };
        if let Err(err) = output_status {
            let _ = fs::remove_file(&partial).await;
            return Err(err);
        }

        fs::rename(&partial, output)
            .await
            .map_err(|source| TranscodeError::Io {
                path: partial.clone(),
                source,
            })?;
        info!(output = %output.display(), "Transcode finished");
        Ok(())
    }
}

/// `<stem>.partial.<ext>` next to the final output; ffmpeg picks the muxer
/// from the extension so it has to stay last.
fn partial_output(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    match output.extension() {
        Some(ext) => output.with_file_name(format!("{stem}.partial.{}", ext.to_string_lossy())),
        None => output.with_file_name(format!("{stem}.partial")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[cfg(unix)]
    use std::os::unix::process::ExitStatusExt;
    #[cfg(windows)]
    use std::os::windows::process::ExitStatusExt;

    type RecordedArgs = Arc<Mutex<Vec<Vec<OsString>>>>;

    struct FailingExecutor {
        calls: RecordedArgs,
    }

    #[async_trait::async_trait]
    impl CommandExecutor for FailingExecutor {
        async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output> {
            let args: Vec<OsString> = command
                .as_std()
                .get_args()
                .map(|arg| arg.to_os_string())
                .collect();
            if let Some(target) = args.last() {
                std::fs::write(target, b"half written").unwrap();
            }
            self.calls.lock().unwrap().push(args);
            Ok(std::process::Output {
                status: std::process::ExitStatus::from_raw(256),
                stdout: Vec::new(),
                stderr: b"Invalid data found when processing input\n".to_vec(),
            })
        }
    }

    struct MissingBinaryExecutor;

    #[async_trait::async_trait]
    impl CommandExecutor for MissingBinaryExecutor {
        async fn run(&self, _command: &mut Command) -> std::io::Result<std::process::Output> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"))
        }
    }

    #[test]
    fn partial_output_keeps_extension_last() {
        assert_eq!(
            partial_output(Path::new("job/S01E01 - Test.mp4")),
            PathBuf::from("job/S01E01 - Test.partial.mp4")
        );
    }

    #[tokio::test]
    async fn engine_failure_cleans_partial_output() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("job.ts");
        let output = dir.path().join("job.mp4");
        std::fs::write(&input, b"ts").unwrap();
        let calls: RecordedArgs = Arc::new(Mutex::new(Vec::new()));
        let transcoder = FfmpegTranscoder::new(
            "ffmpeg",
            Some(Arc::new(FailingExecutor {
                calls: Arc::clone(&calls),
            })),
        );

        let err = transcoder.transcode(&input, &output).await.unwrap_err();

        match err {
            TranscodeError::EngineFailed { stderr, .. } => {
                assert_eq!(stderr, "Invalid data found when processing input");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert!(!output.exists());
        assert!(!dir.path().join("job.partial.mp4").exists());
    }

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let dir = TempDir::new().unwrap();
        let transcoder =
            FfmpegTranscoder::new("/opt/none/ffmpeg", Some(Arc::new(MissingBinaryExecutor)));

        let err = transcoder
            .transcode(&dir.path().join("in.ts"), &dir.path().join("out.mp4"))
            .await
            .unwrap_err();

        assert!(matches!(err, TranscodeError::EngineMissing { .. }));
    }
}
