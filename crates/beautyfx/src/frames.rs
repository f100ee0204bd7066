use std::path::Path;

use anyhow::{anyhow, Context, Result};
use beautyworker::{FrameBuffer, PixelLayout};
use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};

/// Decodes an image file into a BGRA frame.
pub fn load_frame(path: &Path) -> Result<FrameBuffer> {
    let image = image::open(path)
        .with_context(|| format!("failed to decode image {}", path.display()))?
        .to_rgba8();
    let (width, height) = image.dimensions();
    let mut data = image.into_raw();
    swap_red_blue(&mut data, 4);
    FrameBuffer::new(width, height, 4, data)
        .with_context(|| format!("image {} has an unusable shape", path.display()))
}

/// Encodes a BGR or BGRA frame; the format follows the file extension.
pub fn save_frame(frame: &FrameBuffer, path: &Path) -> Result<()> {
    let layout = frame
        .layout()
        .ok_or_else(|| anyhow!("cannot encode a frame with {} channels", frame.channels()))?;
    let mut data = frame.as_bytes().to_vec();
    swap_red_blue(&mut data, usize::from(layout.channels()));

    let image = match layout {
        PixelLayout::Bgra => RgbaImage::from_raw(frame.width(), frame.height(), data)
            .map(DynamicImage::ImageRgba8),
        PixelLayout::Bgr => {
            RgbImage::from_raw(frame.width(), frame.height(), data).map(DynamicImage::ImageRgb8)
        }
    }
    .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;

    let format = ImageFormat::from_path(path)
        .with_context(|| format!("unrecognised output format for {}", path.display()))?;
    // JPEG has no alpha channel.
    let image = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()),
        _ => image,
    };
    image
        .save_with_format(path, format)
        .with_context(|| format!("failed to write image {}", path.display()))
}

fn swap_red_blue(data: &mut [u8], channels: usize) {
    for pixel in data.chunks_exact_mut(channels) {
        pixel.swap(0, 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use tempfile::TempDir;

    #[test]
    fn loaded_frames_are_bgra() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("red.png");
        RgbaImage::from_pixel(3, 2, Rgba([200, 10, 20, 255]))
            .save(&path)
            .unwrap();

        let frame = load_frame(&path).unwrap();

        assert_eq!((frame.width(), frame.height(), frame.channels()), (3, 2, 4));
        assert_eq!(&frame.as_bytes()[..4], &[20, 10, 200, 255]);
    }

    #[test]
    fn bgr_frames_save_as_rgb() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.png");
        let frame = FrameBuffer::new(2, 1, 3, vec![1, 2, 3, 4, 5, 6]).unwrap();

        save_frame(&frame, &path).unwrap();

        let decoded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(decoded.into_raw(), vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn unsupported_layouts_and_extensions_fail() {
        let dir = TempDir::new().unwrap();
        let gray = FrameBuffer::new(1, 1, 1, vec![7]).unwrap();
        assert!(save_frame(&gray, &dir.path().join("gray.png")).is_err());

        let frame = FrameBuffer::blank(1, 1, PixelLayout::Bgra).unwrap();
        assert!(save_frame(&frame, &dir.path().join("frame.unknown")).is_err());
    }
}
