//! Named transcoding profiles.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default target segment duration, seconds.
pub const DEFAULT_SEGMENT_TARGET_SECS: f64 = 30.0;

/// Immutable named preset combining codec, container, dimensions, bitrate
/// and encoder preset.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Profile {
    /// Profile name, e.g. "1080p_h264"
    pub name: String,
    /// Video codec
    pub video_codec: String,
    /// Audio codec
    pub audio_codec: String,
    /// Container format
    pub container: String,
    /// Target width, pixels
    pub width: u32,
    /// Target height, pixels
    pub height: u32,
    /// Target video bitrate, bits/second
    pub bitrate: u64,
    /// Encoder preset (only forwarded to x264/x265-family encoders)
    pub preset: String,
    /// Target segment duration for parallel transcodes, seconds
    #[serde(default = "default_segment_target")]
    pub segment_target_secs: f64,
}

fn default_segment_target() -> f64 {
    DEFAULT_SEGMENT_TARGET_SECS
}

impl Profile {
    /// The built-in profile set.
    pub fn defaults() -> Vec<Profile> {
        vec![
            Profile {
                name: "480p_h264".into(),
                video_codec: "libx264".into(),
                audio_codec: "aac".into(),
                container: "mp4".into(),
                width: 854,
                height: 480,
                bitrate: 1_200_000,
                preset: "veryfast".into(),
                segment_target_secs: DEFAULT_SEGMENT_TARGET_SECS,
            },
            Profile {
                name: "720p_h264".into(),
                video_codec: "libx264".into(),
                audio_codec: "aac".into(),
                container: "mp4".into(),
                width: 1280,
                height: 720,
                bitrate: 2_500_000,
                preset: "fast".into(),
                segment_target_secs: DEFAULT_SEGMENT_TARGET_SECS,
            },
            Profile {
                name: "1080p_h264".into(),
                video_codec: "libx264".into(),
                audio_codec: "aac".into(),
                container: "mp4".into(),
                width: 1920,
                height: 1080,
                bitrate: 5_000_000,
                preset: "fast".into(),
                segment_target_secs: DEFAULT_SEGMENT_TARGET_SECS,
            },
            Profile {
                name: "4k_hevc".into(),
                video_codec: "libx265".into(),
                audio_codec: "aac".into(),
                container: "mp4".into(),
                width: 3840,
                height: 2160,
                bitrate: 12_000_000,
                preset: "medium".into(),
                segment_target_secs: DEFAULT_SEGMENT_TARGET_SECS,
            },
            Profile {
                name: "1080p_vp9".into(),
                video_codec: "libvpx-vp9".into(),
                audio_codec: "libopus".into(),
                container: "webm".into(),
                width: 1920,
                height: 1080,
                bitrate: 4_000_000,
                preset: "good".into(),
                segment_target_secs: DEFAULT_SEGMENT_TARGET_SECS,
            },
        ]
    }

    /// Look up a built-in profile by name.
    pub fn find(name: &str) -> Option<Profile> {
        Self::defaults().into_iter().find(|p| p.name == name)
    }

    /// Resolution string, e.g. "1920x1080".
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}
