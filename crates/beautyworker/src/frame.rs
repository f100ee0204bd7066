//! Host-side pixel buffers exchanged with the worker.

use thiserror::Error;

/// Channel order of a caller-facing buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Bgr,
    Bgra,
}

impl PixelLayout {
    pub fn channels(self) -> u8 {
        match self {
            PixelLayout::Bgr => 3,
            PixelLayout::Bgra => 4,
        }
    }

    pub fn from_channels(channels: u8) -> Option<Self> {
        match channels {
            3 => Some(PixelLayout::Bgr),
            4 => Some(PixelLayout::Bgra),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame dimensions must be non-zero (got {width}x{height}x{channels})")]
    EmptyDimension { width: u32, height: u32, channels: u8 },
    #[error("frame data holds {actual} bytes but {width}x{height}x{channels} needs {expected}")]
    ShapeMismatch {
        width: u32,
        height: u32,
        channels: u8,
        expected: usize,
        actual: usize,
    },
}

/// Row-major, contiguous `height x width x channels` byte buffer.
///
/// Construction checks that the data length matches the shape. The channel
/// count itself is not restricted here; consumers reject anything other than
/// three or four channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<u8>,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Result<Self, FrameError> {
        if width == 0 || height == 0 || channels == 0 {
            return Err(FrameError::EmptyDimension {
                width,
                height,
                channels,
            });
        }
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(FrameError::ShapeMismatch {
                width,
                height,
                channels,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Zero-filled frame with the given layout.
    pub fn blank(width: u32, height: u32, layout: PixelLayout) -> Result<Self, FrameError> {
        let len = width as usize * height as usize * layout.channels() as usize;
        Self::new(width, height, layout.channels(), vec![0; len])
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// `None` when the channel count is not one the engine understands.
    pub fn layout(&self) -> Option<PixelLayout> {
        PixelLayout::from_channels(self.channels)
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.channels as usize
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}
