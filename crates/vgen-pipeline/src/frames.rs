//! Generated frame buffers.

use bytes::Bytes;

use crate::error::{PipelineError, PipelineResult};

/// Bytes per pixel of an rgb24 frame.
const CHANNELS: usize = 3;

/// A generated clip: `num_frames` rgb24 frames stored frame-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrames {
    width: u32,
    height: u32,
    num_frames: u32,
    data: Bytes,
}

impl VideoFrames {
    /// Wrap an rgb24 buffer, checking its length against the frame geometry.
    pub fn from_rgb24(
        width: u32,
        height: u32,
        num_frames: u32,
        data: impl Into<Bytes>,
    ) -> PipelineResult<Self> {
        let data = data.into();
        if width == 0 || height == 0 || num_frames == 0 {
            return Err(PipelineError::invalid_frames(format!(
                "empty geometry {}x{} x {} frames",
                width, height, num_frames
            )));
        }

        let expected = frame_len(width, height) * num_frames as usize;
        if data.len() != expected {
            return Err(PipelineError::invalid_frames(format!(
                "expected {} bytes for {}x{} x {} frames, got {}",
                expected,
                width,
                height,
                num_frames,
                data.len()
            )));
        }

        Ok(Self {
            width,
            height,
            num_frames,
            data,
        })
    }

    /// Build from float samples in `[0, 1]`; out-of-range values are clamped.
    pub fn from_float(width: u32, height: u32, num_frames: u32, samples: &[f32]) -> PipelineResult<Self> {
        let data: Vec<u8> = samples
            .iter()
            .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect();
        Self::from_rgb24(width, height, num_frames, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn num_frames(&self) -> u32 {
        self.num_frames
    }

    /// Size of one frame in bytes.
    pub fn frame_len(&self) -> usize {
        frame_len(self.width, self.height)
    }

    /// Pixels of frame `index`, if in range.
    pub fn frame(&self, index: u32) -> Option<&[u8]> {
        if index >= self.num_frames {
            return None;
        }
        let len = self.frame_len();
        let start = index as usize * len;
        self.data.get(start..start + len)
    }

    /// The whole buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Duration at the given frame rate, in seconds.
    pub fn duration_secs(&self, fps: u32) -> f64 {
        if fps == 0 {
            return 0.0;
        }
        self.num_frames as f64 / fps as f64
    }
}

fn frame_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * CHANNELS
}
