//! Frame crops rendered for the model call.
//!
//! The screenshot itself comes from the browser collaborator; this module only
//! cuts frame bounds out of it and encodes the crops as JPEG data URLs.

use std::path::Path;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use sieve_contracts::scene::{Rect, SceneGraph};

use crate::conversation::Part;

const JPEG_QUALITY: u8 = 85;

pub fn load_screenshot(path: &Path) -> Result<DynamicImage> {
    image::open(path).with_context(|| format!("failed to read screenshot ({})", path.display()))
}

/// Crops `bounds` out of `image`, clamped to the image. `None` when nothing
/// of the rect lies inside it.
pub fn crop_frame(image: &DynamicImage, bounds: &Rect) -> Option<DynamicImage> {
    let (width, height) = (image.width() as f64, image.height() as f64);
    let left = bounds.x.max(0.0).floor();
    let top = bounds.y.max(0.0).floor();
    let right = (bounds.x + bounds.width).min(width).ceil();
    let bottom = (bounds.y + bounds.height).min(height).ceil();
    if !(right > left && bottom > top) {
        return None;
    }
    Some(image.crop_imm(
        left as u32,
        top as u32,
        (right - left) as u32,
        (bottom - top) as u32,
    ))
}

pub fn jpeg_data_url(image: &DynamicImage) -> Result<String> {
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY);
    encoder
        .encode_image(&DynamicImage::ImageRgb8(image.to_rgb8()))
        .context("failed to encode frame crop as JPEG")?;
    Ok(format!("data:image/jpeg;base64,{}", BASE64.encode(bytes)))
}

/// One captioned image part per terminal frame, in scene order.
pub fn frame_images(screenshot: &DynamicImage, scene: &SceneGraph) -> Result<Vec<Part>> {
    let mut parts = Vec::new();
    for frame in scene.terminal_frames() {
        let Some(crop) = crop_frame(screenshot, &frame.bounds) else {
            continue;
        };
        parts.push(Part::Image {
            caption: Some(format!("Frame {}", frame.id)),
            data_url: jpeg_data_url(&crop)?,
        });
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};
    use sieve_contracts::scene::Axis;

    use super::*;

    fn screenshot() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(120, 80, |x, _| {
            if x < 60 {
                Rgb([200, 10, 10])
            } else {
                Rgb([10, 10, 200])
            }
        }))
    }

    #[test]
    fn crop_is_clamped_to_the_screenshot() {
        let image = screenshot();
        let crop = crop_frame(&image, &Rect::new(100.0, 60.0, 50.0, 50.0)).unwrap();
        assert_eq!((crop.width(), crop.height()), (20, 20));
        assert!(crop_frame(&image, &Rect::new(500.0, 0.0, 10.0, 10.0)).is_none());
    }

    #[test]
    fn terminal_frames_become_captioned_jpegs() -> anyhow::Result<()> {
        let mut scene = SceneGraph::new();
        let root = scene.add_root_frame(Rect::new(0.0, 0.0, 120.0, 80.0))?;
        scene.split_frame(&root, Axis::X, 0.5)?;

        let parts = frame_images(&screenshot(), &scene)?;
        assert_eq!(parts.len(), 2);
        let Part::Image { caption, data_url } = &parts[0] else {
            anyhow::bail!("expected an image part");
        };
        assert_eq!(caption.as_deref(), Some("Frame f1"));
        let encoded = data_url
            .strip_prefix("data:image/jpeg;base64,")
            .context("missing data URL prefix")?;
        let decoded = image::load_from_memory(&BASE64.decode(encoded)?)?;
        assert_eq!((decoded.width(), decoded.height()), (60, 80));
        Ok(())
    }
}
