//! Transcode invocation built from a task specification.

use tokio::sync::watch;
use tracing::info;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::progress::ProgressSink;

/// Audio settings applied to every transcode output.
const AUDIO_BITRATE: &str = "192k";
const AUDIO_SAMPLE_RATE: &str = "48000";
const AUDIO_CHANNELS: &str = "2";

/// One transcode invocation: a source (whole or one segment of it) rendered
/// to a single output with one profile's settings.
#[derive(Debug, Clone)]
pub struct TranscodeSpec {
    /// Input URL or local path
    pub input: String,
    /// Output path
    pub output: String,
    /// Segment start within the source, seconds
    pub start_time: Option<f64>,
    /// Segment duration, seconds
    pub duration: Option<f64>,
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
    /// Encoder preset
    pub preset: String,
}

impl TranscodeSpec {
    /// Letterboxed aspect-preserving scale filter.
    fn scale_filter(&self) -> String {
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
            w = self.width,
            h = self.height
        )
    }

    /// Whether the encoder understands `-preset` (x264/x265 family only).
    fn takes_preset(&self) -> bool {
        self.video_codec.contains("x264") || self.video_codec.contains("x265")
    }

    /// Build the FFmpeg command for this spec.
    pub fn build_command(&self) -> FfmpegCommand {
        let mut cmd = FfmpegCommand::new(&self.input, &self.output);

        // Input-side seek keeps segment cuts fast and keyframe-exact.
        if let Some(start) = self.start_time {
            cmd = cmd.seek(start);
        }
        if let Some(duration) = self.duration {
            cmd = cmd.duration(duration);
        }

        let maxrate = ((self.bitrate as f64) * 1.1) as u64;
        let bufsize = self.bitrate * 2;
        cmd = cmd
            .video_codec(&self.video_codec)
            .output_args(["-b:v".to_string(), self.bitrate.to_string()])
            .output_args(["-maxrate".to_string(), maxrate.to_string()])
            .output_args(["-bufsize".to_string(), bufsize.to_string()])
            .video_filter(self.scale_filter());

        if self.takes_preset() && !self.preset.is_empty() {
            cmd = cmd.preset(&self.preset);
        }

        cmd = cmd
            .audio_codec(&self.audio_codec)
            .output_args(["-b:a", AUDIO_BITRATE])
            .output_args(["-ar", AUDIO_SAMPLE_RATE])
            .output_args(["-ac", AUDIO_CHANNELS]);

        if self.container == "mp4" {
            cmd = cmd.output_args(["-movflags", "+faststart"]);
        }

        cmd
    }
}

/// Run a transcode, offering progress snapshots to the sink.
pub async fn transcode(
    spec: &TranscodeSpec,
    sink: ProgressSink,
    cancel_rx: Option<watch::Receiver<bool>>,
) -> MediaResult<()> {
    info!(
        input = %spec.input,
        output = %spec.output,
        codec = %spec.video_codec,
        start = ?spec.start_time,
        duration = ?spec.duration,
        "Transcoding"
    );

    let cmd = spec.build_command();
    let mut runner = FfmpegRunner::new();
    if let Some(rx) = cancel_rx {
        runner = runner.with_cancel(rx);
    }
    runner.run_with_progress(&cmd, sink).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> TranscodeSpec {
        TranscodeSpec {
            input: "in.mp4".into(),
            output: "out.mp4".into(),
            start_time: None,
            duration: None,
            video_codec: "libx264".into(),
            audio_codec: "aac".into(),
            container: "mp4".into(),
            width: 1920,
            height: 1080,
            bitrate: 5_000_000,
            preset: "fast".into(),
        }
    }

    fn arg_after(args: &[String], flag: &str) -> Option<String> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1).cloned())
    }

    #[test]
    fn test_rate_control_args() {
        let args = spec().build_command().build_args();

        assert_eq!(arg_after(&args, "-b:v").unwrap(), "5000000");
        assert_eq!(arg_after(&args, "-maxrate").unwrap(), "5500000");
        assert_eq!(arg_after(&args, "-bufsize").unwrap(), "10000000");
    }

    #[test]
    fn test_segment_mode_seeks_before_input() {
        let mut s = spec();
        s.start_time = Some(30.0);
        s.duration = Some(15.0);
        let args = s.build_command().build_args();

        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < i);
        assert_eq!(args[ss + 1], "30.000");
        assert_eq!(arg_after(&args, "-t").unwrap(), "15.000");
    }

    #[test]
    fn test_whole_input_has_no_seek() {
        let args = spec().build_command().build_args();
        assert!(!args.iter().any(|a| a == "-ss"));
        assert!(!args.iter().any(|a| a == "-t"));
    }

    #[test]
    fn test_letterbox_filter() {
        let args = spec().build_command().build_args();
        let vf = arg_after(&args, "-vf").unwrap();
        assert!(vf.contains("scale=1920:1080:force_original_aspect_ratio=decrease"));
        assert!(vf.contains("pad=1920:1080:(ow-iw)/2:(oh-ih)/2"));
    }

    #[test]
    fn test_preset_only_for_x26x_family() {
        let args = spec().build_command().build_args();
        assert_eq!(arg_after(&args, "-preset").unwrap(), "fast");

        let mut vp9 = spec();
        vp9.video_codec = "libvpx-vp9".into();
        vp9.container = "webm".into();
        let args = vp9.build_command().build_args();
        assert!(!args.iter().any(|a| a == "-preset"));
    }

    #[test]
    fn test_faststart_only_for_mp4() {
        let args = spec().build_command().build_args();
        assert_eq!(arg_after(&args, "-movflags").unwrap(), "+faststart");

        let mut webm = spec();
        webm.container = "webm".into();
        webm.video_codec = "libvpx-vp9".into();
        let args = webm.build_command().build_args();
        assert!(!args.iter().any(|a| a == "-movflags"));
    }

    #[test]
    fn test_audio_settings() {
        let args = spec().build_command().build_args();
        assert_eq!(arg_after(&args, "-c:a").unwrap(), "aac");
        assert_eq!(arg_after(&args, "-b:a").unwrap(), "192k");
        assert_eq!(arg_after(&args, "-ar").unwrap(), "48000");
        assert_eq!(arg_after(&args, "-ac").unwrap(), "2");
    }
}
