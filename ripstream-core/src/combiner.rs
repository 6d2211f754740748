use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};

use crate::progress;

#[derive(Debug, Error)]
pub enum CombineError {
    #[error("raw videos directory does not exist: {path}")]
    MissingDirectory { path: PathBuf },
    #[error("output file already exists: {path}")]
    OutputExists { path: PathBuf },
    #[error("no .{extension} segment files found in {path}")]
    NoSegments { path: PathBuf, extension: String },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type CombineResult<T> = Result<T, CombineError>;

#[derive(Debug, Clone, Serialize)]
pub struct CombineReport {
    pub segments: usize,
    pub bytes: u64,
}

/// Concatenates every `*.<extension>` file of `raw_dir`, sorted by file name,
/// into `output`.
///
/// The bytes are written to `<output>.part` first and renamed once flushed.
pub async fn combine_segments(
    raw_dir: &Path,
    output: &Path,
    extension: &str,
    show_progress: bool,
) -> CombineResult<CombineReport> {
    if !is_dir(raw_dir).await {
        return Err(CombineError::MissingDirectory {
            path: raw_dir.to_path_buf(),
        });
    }
    if fs::metadata(output).await.is_ok() {
        return Err(CombineError::OutputExists {
            path: output.to_path_buf(),
        });
    }

    let inputs = list_segments(raw_dir, extension).await?;
    if inputs.is_empty() {
        return Err(CombineError::NoSegments {
            path: raw_dir.to_path_buf(),
            extension: extension.to_string(),
        });
    }
    debug!(count = inputs.len(), first = ?inputs.first(), last = ?inputs.last(), "combining segments");

    let partial = partial_path(output);
    let bar = progress::counter(show_progress, Some(inputs.len() as u64), "Combining…", "vids");
    let result = concatenate(&inputs, &partial, &bar).await;
    bar.finish_and_clear();
    let bytes = match result {
        Ok(bytes) => bytes,
        Err(err) => {
            let _ = fs::remove_file(&partial).await;
            return Err(err);
        }
    };

    fs::rename(&partial, output)
        .await
        .map_err(|source| CombineError::Io {
            path: output.to_path_buf(),
            source,
        })?;
    info!(segments = inputs.len(), bytes, output = %output.display(), "combined stream written");
    Ok(CombineReport {
        segments: inputs.len(),
        bytes,
    })
}

async fn concatenate(
    inputs: &[PathBuf],
    partial: &Path,
    bar: &indicatif::ProgressBar,
) -> CombineResult<u64> {
    let file = fs::File::create(partial)
        .await
        .map_err(|source| CombineError::Io {
            path: partial.to_path_buf(),
            source,
        })?;
    let mut writer = BufWriter::new(file);
    let mut total = 0u64;
    for input in inputs {
        let mut reader = fs::File::open(input)
            .await
            .map_err(|source| CombineError::Io {
                path: input.clone(),
                source,
            })?;
        total += tokio::io::copy(&mut reader, &mut writer)
            .await
            .map_err(|source| CombineError::Io {
                path: input.clone(),
                source,
            })?;
        bar.inc(1);
    }
    writer.flush().await.map_err(|source| CombineError::Io {
        path: partial.to_path_buf(),
        source,
    })?;
    writer
        .into_inner()
        .sync_all()
        .await
        .map_err(|source| CombineError::Io {
            path: partial.to_path_buf(),
            source,
        })?;
    Ok(total)
}

async fn list_segments(raw_dir: &Path, extension: &str) -> CombineResult<Vec<PathBuf>> {
    let io_error = |source| CombineError::Io {
        path: raw_dir.to_path_buf(),
        source,
    };
    let mut entries = fs::read_dir(raw_dir).await.map_err(io_error)?;
    let mut inputs = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        let path = entry.path();
        let matches_extension = path
            .extension()
            .map(|ext| ext == extension)
            .unwrap_or(false);
        if !matches_extension {
            continue;
        }
        let file_type = entry.file_type().await.map_err(io_error)?;
        if file_type.is_file() {
            inputs.push(path);
        }
    }
    inputs.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(inputs)
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    output.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::segment_file_name;
    use tempfile::TempDir;

    fn write_segments(dir: &Path, segments: &[(u64, &[u8])]) {
        std::fs::create_dir_all(dir).unwrap();
        for (index, body) in segments {
            std::fs::write(dir.join(segment_file_name(*index, 5, "ts")), body).unwrap();
        }
    }

    #[tokio::test]
    async fn concatenates_in_index_order_across_digit_counts() {
        let dir = TempDir::new().unwrap();
        let raw_dir = dir.path().join("raw-ts-videos");
        write_segments(
            &raw_dir,
            &[(100, b"[100]"), (2, b"[2]"), (10, b"[10]"), (9, b"[9]")],
        );
        let output = dir.path().join("job.ts");

        let report = combine_segments(&raw_dir, &output, "ts", false)
            .await
            .unwrap();

        assert_eq!(report.segments, 4);
        assert_eq!(report.bytes, 15);
        assert_eq!(std::fs::read(&output).unwrap(), b"[2][9][10][100]");
        assert!(!dir.path().join("job.ts.part").exists());
    }

    #[tokio::test]
    async fn ignores_other_files() {
        let dir = TempDir::new().unwrap();
        let raw_dir = dir.path().join("raw");
        write_segments(&raw_dir, &[(0, b"a"), (1, b"b")]);
        std::fs::write(raw_dir.join("00002.ts.part"), b"partial").unwrap();
        std::fs::write(raw_dir.join("notes.txt"), b"notes").unwrap();
        std::fs::create_dir_all(raw_dir.join("nested.ts")).unwrap();
        let output = dir.path().join("out.ts");

        combine_segments(&raw_dir, &output, "ts", false)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"ab");
    }

    #[tokio::test]
    async fn refuses_to_overwrite_output() {
        let dir = TempDir::new().unwrap();
        let raw_dir = dir.path().join("raw");
        write_segments(&raw_dir, &[(0, b"a")]);
        let output = dir.path().join("out.ts");
        std::fs::write(&output, b"existing").unwrap();

        let err = combine_segments(&raw_dir, &output, "ts", false)
            .await
            .unwrap_err();

        assert!(matches!(err, CombineError::OutputExists { .. }));
        assert_eq!(std::fs::read(&output).unwrap(), b"existing");
    }

    #[tokio::test]
    async fn requires_raw_directory() {
        let dir = TempDir::new().unwrap();
        let err = combine_segments(&dir.path().join("missing"), &dir.path().join("out.ts"), "ts", false)
            .await
            .unwrap_err();
        assert!(matches!(err, CombineError::MissingDirectory { .. }));
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn empty_directory_leaves_no_output() {
        let dir = TempDir::new().unwrap();
        let raw_dir = dir.path().join("raw");
        std::fs::create_dir_all(&raw_dir).unwrap();
        let output = dir.path().join("out.ts");

        let err = combine_segments(&raw_dir, &output, "ts", false)
            .await
            .unwrap_err();

        assert!(matches!(err, CombineError::NoSegments { .. }));
        assert!(!output.exists());
    }
}
