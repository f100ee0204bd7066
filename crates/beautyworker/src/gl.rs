//! The subset of OpenGL entry points the texture bridge relies on.
//!
//! Implemented for [`glow::Context`] on real hardware and for
//! [`crate::soft::SoftGl`] in tests. All methods assume the owning context is
//! current on the calling thread.

use std::num::NonZeroU32;

use glow::HasContext;

/// Status reported by a framebuffer that can be read from.
pub const FRAMEBUFFER_COMPLETE: u32 = glow::FRAMEBUFFER_COMPLETE;

/// Raw GL texture name. Zero is the null texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

impl TextureId {
    pub const NULL: TextureId = TextureId(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Raw GL framebuffer name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferId(pub u32);

pub trait GlApi {
    fn alloc_texture(&self) -> Result<TextureId, String>;

    /// Uploads tightly packed RGBA8 rows, bottom row first, with linear
    /// filtering and edge clamping.
    fn upload_rgba(&self, texture: TextureId, width: u32, height: u32, pixels: &[u8]);

    fn free_texture(&self, texture: TextureId);

    fn alloc_framebuffer(&self) -> Result<FramebufferId, String>;

    /// Binds `framebuffer`, attaches `texture` as its colour target and
    /// returns the completeness status.
    fn attach_color(&self, framebuffer: FramebufferId, texture: TextureId) -> u32;

    /// Reads RGBA8 pixels from the bound framebuffer, bottom row first.
    fn read_rgba(&self, width: u32, height: u32, pixels: &mut [u8]);

    fn unbind_framebuffer(&self);

    fn free_framebuffer(&self, framebuffer: FramebufferId);
}

fn native_texture(texture: TextureId) -> Option<glow::NativeTexture> {
    NonZeroU32::new(texture.0).map(glow::NativeTexture)
}

fn native_framebuffer(framebuffer: FramebufferId) -> Option<glow::NativeFramebuffer> {
    NonZeroU32::new(framebuffer.0).map(glow::NativeFramebuffer)
}

impl GlApi for glow::Context {
    fn alloc_texture(&self) -> Result<TextureId, String> {
        let texture = unsafe { self.create_texture() }?;
        Ok(TextureId(texture.0.get()))
    }

    fn upload_rgba(&self, texture: TextureId, width: u32, height: u32, pixels: &[u8]) {
        let Some(native) = native_texture(texture) else {
            return;
        };
        unsafe {
            self.bind_texture(glow::TEXTURE_2D, Some(native));
            self.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_MIN_FILTER,
                glow::LINEAR as i32,
            );
            self.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_MAG_FILTER,
                glow::LINEAR as i32,
            );
            self.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_WRAP_S,
                glow::CLAMP_TO_EDGE as i32,
            );
            self.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_WRAP_T,
                glow::CLAMP_TO_EDGE as i32,
            );
            self.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            self.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGBA as i32,
                width as i32,
                height as i32,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                Some(pixels),
            );
            self.bind_texture(glow::TEXTURE_2D, None);
        }
    }

    fn free_texture(&self, texture: TextureId) {
        if let Some(native) = native_texture(texture) {
            unsafe { self.delete_texture(native) };
        }
    }

    fn alloc_framebuffer(&self) -> Result<FramebufferId, String> {
        let framebuffer = unsafe { self.create_framebuffer() }?;
        Ok(FramebufferId(framebuffer.0.get()))
    }

    fn attach_color(&self, framebuffer: FramebufferId, texture: TextureId) -> u32 {
        unsafe {
            self.bind_framebuffer(glow::FRAMEBUFFER, native_framebuffer(framebuffer));
            self.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                native_texture(texture),
                0,
            );
            self.check_framebuffer_status(glow::FRAMEBUFFER)
        }
    }

    fn read_rgba(&self, width: u32, height: u32, pixels: &mut [u8]) {
        unsafe {
            self.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
            self.read_pixels(
                0,
                0,
                width as i32,
                height as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::Slice(pixels),
            );
        }
    }

    fn unbind_framebuffer(&self) {
        unsafe { self.bind_framebuffer(glow::FRAMEBUFFER, None) };
    }

    fn free_framebuffer(&self, framebuffer: FramebufferId) {
        if let Some(native) = native_framebuffer(framebuffer) {
            unsafe { self.delete_framebuffer(native) };
        }
    }
}
