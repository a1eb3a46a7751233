//! Probe result types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Codec type of a media stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CodecType {
    Video,
    Audio,
    Subtitle,
}

/// One stream of a probed source.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StreamInfo {
    /// Stream index
    pub index: u32,
    /// Codec type
    pub codec_type: CodecType,
    /// Codec name (e.g. "h264", "aac")
    pub codec_name: String,
}

/// Metadata extracted from a source URL.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProbeResult {
    /// Duration in seconds
    pub duration: f64,
    /// Width of the primary video stream, pixels
    pub width: u32,
    /// Height of the primary video stream, pixels
    pub height: u32,
    /// Container format name
    pub format: String,
    /// Overall bitrate, bits/second
    pub bitrate: u64,
    /// All streams in index order
    pub streams: Vec<StreamInfo>,
    /// Keyframe timestamps in seconds, monotonic non-decreasing.
    /// Empty when keyframe extraction failed; segmentation then falls back
    /// to fixed-duration partitioning.
    #[serde(default)]
    pub keyframes: Vec<f64>,
}

impl ProbeResult {
    /// Whether the source has a video stream.
    pub fn has_video(&self) -> bool {
        self.streams
            .iter()
            .any(|s| s.codec_type == CodecType::Video)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyframes_default_empty() {
        let parsed: ProbeResult = serde_json::from_str(
            r#"{
                "duration": 30.0,
                "width": 1920,
                "height": 1080,
                "format": "mov,mp4,m4a,3gp,3g2,mj2",
                "bitrate": 4000000,
                "streams": [
                    {"index": 0, "codec_type": "video", "codec_name": "h264"}
                ]
            }"#,
        )
        .unwrap();

        assert!(parsed.keyframes.is_empty());
        assert!(parsed.has_video());
    }
}
