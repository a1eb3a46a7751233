//! Typed parameter and result payloads for each task type.
//!
//! Task rows carry opaque JSON; these types define the shapes each handler
//! expects. The worker deserialises params at dispatch time and treats a
//! mismatch as a permanent validation failure.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Parameters for a probe task.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProbeParams {
    /// Source URL to probe
    pub url: String,
}

/// Parameters for a transcode task.
///
/// When `start_time`/`duration` are set the task covers one segment of the
/// source; otherwise the whole input.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TranscodeParams {
    /// Input URL (any scheme; `s3://` is localised by the worker)
    pub input: String,
    /// Output URL or path
    pub output: String,
    /// Segment start within the source, seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,
    /// Segment duration, seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Video codec (e.g. "libx264")
    pub video_codec: String,
    /// Audio codec (e.g. "aac")
    pub audio_codec: String,
    /// Container format (e.g. "mp4", "webm")
    pub container: String,
    /// Target width in pixels
    pub width: u32,
    /// Target height in pixels
    pub height: u32,
    /// Target video bitrate, bits/second
    pub bitrate: u64,
    /// Encoder preset, forwarded only to x264/x265-family encoders
    pub preset: String,
    /// Segment index within the job, when in segment mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_index: Option<u32>,
    /// Profile name this task renders
    pub profile: String,
}

/// Result payload of a transcode task.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TranscodeOutput {
    /// Where the produced file ended up (local path or `s3://` URL)
    pub url: String,
    /// Segment index recovered from the params, used to order stitch inputs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_index: Option<u32>,
    /// Profile name this output belongs to
    pub profile: String,
}

/// Parameters for a stitch task.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StitchParams {
    /// Segment files in playback order
    pub segments: Vec<String>,
    /// Output URL or path
    pub output: String,
}

/// One variant entry of an HLS master playlist.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ManifestVariant {
    /// Variant playlist or media path
    pub path: String,
    /// Peak bandwidth in bits/second
    pub bandwidth: u64,
    /// Resolution string, e.g. "1920x1080"
    pub resolution: String,
}

/// Parameters for a manifest task.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ManifestParams {
    /// Variants to reference, one `#EXT-X-STREAM-INF` each
    pub variants: Vec<ManifestVariant>,
    /// Output URL or path for the master playlist
    pub output: String,
}

/// Parameters for a restream task.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RestreamParams {
    /// Target platform id, matched against publisher plugin ids
    pub platform: String,
    /// File to publish (localised first when remote)
    pub file_url: String,
    /// Platform credentials, passed through to the plugin
    #[serde(default)]
    pub credentials: HashMap<String, String>,
}

/// Result payload of a restream task.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RestreamOutput {
    /// Platform-assigned id of the published media
    pub platform_id: String,
    /// Public URL on the platform
    pub url: String,
}
