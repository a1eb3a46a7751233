//! Copy-only stitching of segment outputs via the concat demuxer.

use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::info;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Write a concat-demuxer manifest listing `segments` in order.
///
/// Single quotes inside paths are escaped as `'\''`, the quoting form the
/// concat demuxer shares with POSIX shells.
pub async fn write_concat_manifest(
    segments: &[PathBuf],
    manifest_path: &Path,
) -> MediaResult<()> {
    if segments.is_empty() {
        return Err(MediaError::EmptySegments);
    }

    let mut contents = String::new();
    for segment in segments {
        contents.push_str(&format!("file '{}'\n", escape_concat_path(segment)));
    }

    tokio::fs::write(manifest_path, contents).await?;
    Ok(())
}

fn escape_concat_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', "'\\''")
}

/// Stitch segments listed in a concat manifest into `output` without
/// re-encoding.
pub async fn stitch_segments(
    manifest_path: &Path,
    output: &Path,
    cancel_rx: Option<watch::Receiver<bool>>,
) -> MediaResult<()> {
    info!(
        manifest = %manifest_path.display(),
        output = %output.display(),
        "Stitching segments"
    );

    let cmd = FfmpegCommand::new(
        manifest_path.to_string_lossy(),
        output.to_string_lossy(),
    )
    .input_args(["-f", "concat", "-safe", "0"])
    .output_args(["-c", "copy", "-movflags", "+faststart"]);

    let mut runner = FfmpegRunner::new();
    if let Some(rx) = cancel_rx {
        runner = runner.with_cancel(rx);
    }
    runner.run(&cmd).await
}
