//! MP4 export of generated frames.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{PipelineError, PipelineResult};
use crate::frames::VideoFrames;

/// H.264 quality for exported clips.
const EXPORT_CRF: u8 = 18;
const EXPORT_PRESET: &str = "medium";

/// Build the FFmpeg invocation that encodes rgb24 frames from stdin.
fn export_command(frames: &VideoFrames, output: &Path, fps: u32) -> FfmpegCommand {
    FfmpegCommand::from_stdin(output)
        .raw_rgb24_input(frames.width(), frames.height(), fps)
        .video_codec("libx264")
        .pixel_format("yuv420p")
        .crf(EXPORT_CRF)
        .preset(EXPORT_PRESET)
        .faststart()
}

/// Encode `frames` as an H.264 MP4 at `fps` and write it to `output`.
pub async fn export_to_video(
    frames: &VideoFrames,
    output: &Path,
    fps: u32,
    timeout: Duration,
) -> PipelineResult<()> {
    if fps == 0 {
        return Err(PipelineError::config("export frame rate must be positive"));
    }
    if frames.width() % 2 != 0 || frames.height() % 2 != 0 {
        return Err(PipelineError::invalid_frames(format!(
            "yuv420p needs even dimensions, got {}x{}",
            frames.width(),
            frames.height()
        )));
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let cmd = export_command(frames, output, fps);
    debug!(
        frames = frames.num_frames(),
        width = frames.width(),
        height = frames.height(),
        "Exporting video"
    );

    FfmpegRunner::new()
        .with_timeout(timeout)
        .run_with_input(&cmd, frames.as_bytes())
        .await?;

    info!(
        "Video exported to {} ({:.2}s at {} fps)",
        output.display(),
        frames.duration_secs(fps),
        fps
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(width: u32, height: u32, n: u32) -> VideoFrames {
        VideoFrames::from_rgb24(width, height, n, vec![128; (width * height * 3 * n) as usize]).unwrap()
    }

    #[test]
    fn test_export_command_args() {
        let args = export_command(&frames(16, 16, 2), Path::new("output.mp4"), 24).build_args();
        assert!(args.contains(&"rawvideo".to_string()));
        assert!(args.contains(&"16x16".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"yuv420p".to_string()));
    }

    #[tokio::test]
    async fn test_export_rejects_odd_dimensions() {
        let err = export_to_video(&frames(15, 16, 1), Path::new("x.mp4"), 24, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidFrames(_)));
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg"]
    async fn test_export_writes_mp4() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");

        export_to_video(&frames(64, 64, 25), &path, 24, Duration::from_secs(60))
            .await
            .unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert!(meta.len() > 0);
    }
}
