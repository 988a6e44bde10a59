//! Frame preparation for the detectors.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb};

use crate::config::CropRect;
use crate::types::{BgrImage, BgraImage};

/// Grey used to pad the letterboxed area
pub const PAD_VALUE: u8 = 114;

/// Copy the crop region of a BGRA frame into a BGR image, dropping alpha.
pub fn to_bgr(frame: &BgraImage, crop: CropRect) -> BgrImage {
    let (frame_w, frame_h) = frame.dimensions();
    let x = crop.x.min(frame_w);
    let y = crop.y.min(frame_h);
    let width = crop.width.min(frame_w - x);
    let height = crop.height.min(frame_h - y);

    ImageBuffer::from_fn(width, height, |px, py| {
        let p = frame.get_pixel(x + px, y + py);
        Rgb([p[0], p[1], p[2]])
    })
}

/// Resized input plus the factor that maps model space back to the image
pub struct Letterboxed {
    pub image: BgrImage,
    /// Model pixels per source pixel
    pub ratio: f32,
}

/// Scale `image` to fit `target_w`×`target_h` keeping its aspect ratio.
///
/// The scaled image sits in the top-left corner; the remainder is grey.
pub fn letterbox(image: &BgrImage, target_w: u32, target_h: u32) -> Letterboxed {
    let (w, h) = image.dimensions();
    let mut canvas = ImageBuffer::from_pixel(target_w, target_h, Rgb([PAD_VALUE; 3]));
    if w == 0 || h == 0 {
        return Letterboxed {
            image: canvas,
            ratio: 1.0,
        };
    }

    let ratio = (target_w as f32 / w as f32).min(target_h as f32 / h as f32);
    let scaled_w = ((w as f32 * ratio) as u32).clamp(1, target_w);
    let scaled_h = ((h as f32 * ratio) as u32).clamp(1, target_h);

    let scaled = imageops::resize(image, scaled_w, scaled_h, FilterType::Triangle);
    imageops::replace(&mut canvas, &scaled, 0, 0);

    Letterboxed {
        image: canvas,
        ratio,
    }
}

/// NCHW f32 blob with values in 0..255, channel order preserved (B, G, R).
#[cfg(feature = "onnx")]
pub fn to_blob(image: &BgrImage) -> ndarray::Array4<f32> {
    let (w, h) = image.dimensions();
    ndarray::Array4::from_shape_fn((1, 3, h as usize, w as usize), |(_, c, y, x)| {
        image.get_pixel(x as u32, y as u32)[c] as f32
    })
}
