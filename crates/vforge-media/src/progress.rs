//! FFmpeg progress parsing and delivery.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Progress information from FFmpeg's `-progress` output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed (e.g. 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Bitrate as reported, e.g. "4216.3kbits/s"
    pub bitrate: String,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Calculate progress percentage given total duration in milliseconds.
    pub fn percentage(&self, total_duration_ms: i64) -> f64 {
        if total_duration_ms <= 0 {
            return 0.0;
        }
        ((self.out_time_ms as f64 / total_duration_ms as f64) * 100.0).min(100.0)
    }
}

/// Non-blocking progress sink backed by a bounded channel.
///
/// Snapshots are offered with `try_send`; when the receiver lags, updates
/// are dropped rather than buffered, so a slow consumer can never stall the
/// encoder's stderr reader.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::Sender<FfmpegProgress>,
}

impl ProgressSink {
    /// Create a sink and its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<FfmpegProgress>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Offer a snapshot without blocking. Dropped updates are not an error.
    pub fn offer(&self, progress: FfmpegProgress) {
        let _ = self.tx.try_send(progress);
    }
}

/// Parse a single `key=value` line from FFmpeg's progress channel.
///
/// Returns a snapshot on each `progress=` line, which terminates one block
/// of the progress report.
pub(crate) fn parse_progress_line(line: &str, current: &mut FfmpegProgress) -> Option<FfmpegProgress> {
    let line = line.trim();

    if let Some((key, value)) = line.split_once('=') {
        match key {
            "out_time_ms" | "out_time_us" => {
                // Both keys report microseconds in practice; ffmpeg's
                // out_time_ms has been microseconds since 2015.
                if let Ok(us) = value.parse::<i64>() {
                    current.out_time_ms = us / 1000;
                }
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    current.frame = frame;
                }
            }
            "fps" => {
                if let Ok(fps) = value.parse() {
                    current.fps = fps;
                }
            }
            "bitrate" => {
                if value != "N/A" {
                    current.bitrate = value.to_string();
                }
            }
            "speed" => {
                // Format: "1.5x" or "N/A"
                if value != "N/A" {
                    if let Some(speed_str) = value.strip_suffix('x') {
                        if let Ok(speed) = speed_str.parse() {
                            current.speed = speed;
                        }
                    }
                }
            }
            "progress" => {
                // "continue" or "end"
                if value == "end" {
                    current.is_complete = true;
                }
                return Some(current.clone());
            }
            _ => {}
        }
    }

    None
}
