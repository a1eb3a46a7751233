//! HLS master playlist generation.

use std::path::Path;
use tracing::info;

use vforge_models::ManifestVariant;

use crate::error::MediaResult;

/// Write an HLS master playlist referencing `variants`.
///
/// An empty variant list still produces a header-only playlist.
pub async fn write_master_playlist(
    variants: &[ManifestVariant],
    output: &Path,
) -> MediaResult<()> {
    let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");

    for variant in variants {
        playlist.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}\n{}\n",
            variant.bandwidth, variant.resolution, variant.path
        ));
    }

    tokio::fs::write(output, playlist).await?;
    info!(
        output = %output.display(),
        variants = variants.len(),
        "Wrote HLS master playlist"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_master_playlist_shape() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("master.m3u8");

        let variants = vec![
            ManifestVariant {
                path: "720p_h264/index.m3u8".into(),
                bandwidth: 2_500_000,
                resolution: "1280x720".into(),
            },
            ManifestVariant {
                path: "1080p_h264/index.m3u8".into(),
                bandwidth: 5_000_000,
                resolution: "1920x1080".into(),
            },
        ];

        write_master_playlist(&variants, &out).await.unwrap();

        let contents = tokio::fs::read_to_string(&out).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(lines[1], "#EXT-X-VERSION:3");
        assert_eq!(
            lines[2],
            "#EXT-X-STREAM-INF:BANDWIDTH=2500000,RESOLUTION=1280x720"
        );
        assert_eq!(lines[3], "720p_h264/index.m3u8");
        assert_eq!(lines.len(), 6);
    }

    #[tokio::test]
    async fn test_empty_variants_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("master.m3u8");

        write_master_playlist(&[], &out).await.unwrap();

        let contents = tokio::fs::read_to_string(&out).await.unwrap();
        assert_eq!(contents, "#EXTM3U\n#EXT-X-VERSION:3\n");
    }
}
