//! Moves frames between host memory and GPU textures.
//!
//! Host frames are top-down BGR/BGRA; GL textures are bottom-up RGBA. The
//! bridge performs both conversions on upload and undoes them on read-back, so
//! an unmodified texture reads back as the frame it was uploaded from.

use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::frame::{FrameBuffer, PixelLayout};
use crate::gl::{FramebufferId, GlApi, TextureId, FRAMEBUFFER_COMPLETE};

#[derive(Debug, Error)]
pub enum TextureError {
    #[error("unsupported channel count {channels}; expected 3 (BGR) or 4 (BGRA)")]
    UnsupportedFormat { channels: u8 },
    #[error("failed to allocate {what}: {reason}")]
    Allocation { what: &'static str, reason: String },
    #[error("render target rejected texture {texture} (status {status:#06x})")]
    IncompleteTarget { texture: u32, status: u32 },
    #[error("cannot read back the null texture")]
    NullTexture,
    #[error("invalid read-back size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    #[error("texture bridge is closed")]
    Closed,
}

/// A texture created by [`TextureBridge::upload`]; the caller must release it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadedTexture {
    pub id: TextureId,
    pub width: u32,
    pub height: u32,
}

pub struct TextureBridge<G: GlApi> {
    gl: Rc<G>,
    scratch: Option<FramebufferId>,
}

impl<G: GlApi> TextureBridge<G> {
    /// Creates the bridge and its read-back render target.
    pub fn new(gl: Rc<G>) -> Result<Self, TextureError> {
        let scratch = gl
            .alloc_framebuffer()
            .map_err(|reason| TextureError::Allocation {
                what: "read-back framebuffer",
                reason,
            })?;
        Ok(Self {
            gl,
            scratch: Some(scratch),
        })
    }

    pub fn upload(&self, frame: &FrameBuffer) -> Result<UploadedTexture, TextureError> {
        if self.is_closed() {
            return Err(TextureError::Closed);
        }
        let layout = frame.layout().ok_or(TextureError::UnsupportedFormat {
            channels: frame.channels(),
        })?;
        let rgba = bgr_to_rgba_bottom_up(frame, layout);
        let id = self
            .gl
            .alloc_texture()
            .map_err(|reason| TextureError::Allocation {
                what: "texture",
                reason,
            })?;
        self.gl.upload_rgba(id, frame.width(), frame.height(), &rgba);
        debug!(
            texture = id.0,
            width = frame.width(),
            height = frame.height(),
            "uploaded frame"
        );
        Ok(UploadedTexture {
            id,
            width: frame.width(),
            height: frame.height(),
        })
    }

    /// Reads `texture` back into a top-down frame with the requested layout.
    pub fn read_back(
        &self,
        texture: TextureId,
        width: u32,
        height: u32,
        layout: PixelLayout,
    ) -> Result<FrameBuffer, TextureError> {
        let scratch = self.scratch.ok_or(TextureError::Closed)?;
        if texture.is_null() {
            return Err(TextureError::NullTexture);
        }
        if width == 0 || height == 0 {
            return Err(TextureError::InvalidSize { width, height });
        }

        let status = self.gl.attach_color(scratch, texture);
        if status != FRAMEBUFFER_COMPLETE {
            self.gl.unbind_framebuffer();
            return Err(TextureError::IncompleteTarget {
                texture: texture.0,
                status,
            });
        }
        let mut rgba = vec![0u8; width as usize * height as usize * 4];
        self.gl.read_rgba(width, height, &mut rgba);
        self.gl.unbind_framebuffer();

        let data = rgba_bottom_up_to_bgr(&rgba, width, height, layout);
        FrameBuffer::new(width, height, layout.channels(), data).map_err(|_| {
            TextureError::InvalidSize { width, height }
        })
    }

    /// Deletes a texture produced by [`Self::upload`]. The null texture is ignored.
    pub fn release(&self, texture: TextureId) {
        if texture.is_null() {
            return;
        }
        self.gl.free_texture(texture);
        debug!(texture = texture.0, "released texture");
    }

    pub fn close(&mut self) {
        if let Some(scratch) = self.scratch.take() {
            self.gl.free_framebuffer(scratch);
            debug!("closed texture bridge");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.scratch.is_none()
    }
}

impl<G: GlApi> Drop for TextureBridge<G> {
    fn drop(&mut self) {
        if self.scratch.is_some() {
            warn!("texture bridge dropped without close; releasing render target");
            self.close();
        }
    }
}

/// Releases an uploaded texture when dropped.
pub(crate) struct TextureLease<'a, G: GlApi> {
    bridge: &'a TextureBridge<G>,
    texture: TextureId,
}

impl<'a, G: GlApi> TextureLease<'a, G> {
    pub(crate) fn new(bridge: &'a TextureBridge<G>, texture: TextureId) -> Self {
        Self { bridge, texture }
    }
}

impl<G: GlApi> Drop for TextureLease<'_, G> {
    fn drop(&mut self) {
        self.bridge.release(self.texture);
    }
}

fn bgr_to_rgba_bottom_up(frame: &FrameBuffer, layout: PixelLayout) -> Vec<u8> {
    let channels = layout.channels() as usize;
    let mut rgba = Vec::with_capacity(frame.width() as usize * frame.height() as usize * 4);
    for row in frame.as_bytes().chunks_exact(frame.stride()).rev() {
        for pixel in row.chunks_exact(channels) {
            let alpha = if channels == 4 { pixel[3] } else { u8::MAX };
            rgba.extend_from_slice(&[pixel[2], pixel[1], pixel[0], alpha]);
        }
    }
    rgba
}

fn rgba_bottom_up_to_bgr(rgba: &[u8], width: u32, height: u32, layout: PixelLayout) -> Vec<u8> {
    let channels = layout.channels() as usize;
    let mut out = Vec::with_capacity(width as usize * height as usize * channels);
    for row in rgba.chunks_exact(width as usize * 4).rev() {
        for pixel in row.chunks_exact(4) {
            out.extend_from_slice(&[pixel[2], pixel[1], pixel[0]]);
            if layout == PixelLayout::Bgra {
                out.push(pixel[3]);
            }
        }
    }
    out
}
