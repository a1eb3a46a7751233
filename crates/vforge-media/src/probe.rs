//! FFprobe source inspection.

use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use vforge_models::{CodecType, ProbeResult, StreamInfo};

use crate::error::{MediaError, MediaResult};

/// FFprobe JSON output format.
#[derive(Debug, serde::Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, serde::Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    format_name: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct FfprobeStream {
    index: u32,
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

/// Probe a URL for container metadata, streams and keyframe timestamps.
///
/// Runs ffprobe twice: once for format/stream metadata, once to enumerate
/// video frames and retain keyframe timestamps. Keyframe extraction failure
/// is non-fatal; segmentation then falls back to fixed-duration
/// partitioning.
pub async fn probe_url(url: &str) -> MediaResult<ProbeResult> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

    let metadata = probe_metadata(url).await?;

    let keyframes = match probe_keyframes(url).await {
        Ok(keyframes) => keyframes,
        Err(e) => {
            warn!("Keyframe extraction failed for {}: {}", url, e);
            Vec::new()
        }
    };

    Ok(ProbeResult {
        keyframes,
        ..metadata
    })
}

/// First invocation: container and stream metadata as JSON.
async fn probe_metadata(url: &str) -> MediaResult<ProbeResult> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::ffprobe_failed(
            format!("metadata probe of {url} failed"),
            Some(String::from_utf8_lossy(&output.stderr).to_string()),
        ));
    }

    let probe: FfprobeOutput = serde_json::from_slice(&output.stdout)?;

    let video_stream = probe.streams.iter().find(|s| s.codec_type == "video");

    let duration = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let bitrate = probe
        .format
        .bit_rate
        .as_deref()
        .and_then(|b| b.parse::<u64>().ok())
        .unwrap_or(0);

    let streams = probe
        .streams
        .iter()
        .filter_map(|s| {
            let codec_type = match s.codec_type.as_str() {
                "video" => CodecType::Video,
                "audio" => CodecType::Audio,
                "subtitle" => CodecType::Subtitle,
                _ => return None,
            };
            Some(StreamInfo {
                index: s.index,
                codec_type,
                codec_name: s.codec_name.clone().unwrap_or_default(),
            })
        })
        .collect();

    Ok(ProbeResult {
        duration,
        width: video_stream.and_then(|s| s.width).unwrap_or(0),
        height: video_stream.and_then(|s| s.height).unwrap_or(0),
        format: probe.format.format_name.unwrap_or_default(),
        bitrate,
        streams,
        keyframes: Vec::new(),
    })
}

/// Second invocation: enumerate video frames as `(key_frame, pts_time)`
/// pairs and retain the keyframe timestamps.
async fn probe_keyframes(url: &str) -> MediaResult<Vec<f64>> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-select_streams",
            "v:0",
            "-show_entries",
            "frame=key_frame,pts_time",
            "-of",
            "csv=p=0",
        ])
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::ffprobe_failed(
            format!("keyframe probe of {url} failed"),
            Some(String::from_utf8_lossy(&output.stderr).to_string()),
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let keyframes = parse_keyframe_lines(&stdout);
    debug!("Probed {} keyframes from {}", keyframes.len(), url);

    Ok(keyframes)
}

/// Parse `key_frame,pts_time` CSV lines, keeping keyframe timestamps.
fn parse_keyframe_lines(csv: &str) -> Vec<f64> {
    let mut keyframes: Vec<f64> = csv
        .lines()
        .filter_map(|line| {
            let mut fields = line.trim().split(',');
            let is_key = fields.next()?.trim() == "1";
            let pts: f64 = fields.next()?.trim().parse().ok()?;
            is_key.then_some(pts)
        })
        .collect();

    // Decode order can differ from presentation order.
    keyframes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    keyframes
}
