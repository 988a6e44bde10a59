//! Frame sources for the tick thread.

use std::path::Path;
use std::sync::Arc;

use image::Rgba;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::{BgraImage, Frame};

/// Something the tick thread can pull frames from.
pub trait CaptureSource: Send + 'static {
    /// Latest frame at native resolution, `None` when nothing is available.
    fn capture_frame(&mut self) -> Option<Frame>;
}

/// Capture slot fed by a host that owns the real surface.
///
/// Clones share the slot, so a host handle can push while the filter owns
/// another clone as its capture source.
#[derive(Clone, Default)]
pub struct PushSource {
    latest: Arc<Mutex<Option<Frame>>>,
}

impl PushSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy a BGRA surface into an owned frame.
    ///
    /// `stride` is the byte length of one row in `data`, at least `width * 4`.
    pub fn push(&self, data: &[u8], width: u32, height: u32, stride: usize) -> Result<()> {
        let row_bytes = width as usize * 4;
        if width == 0 || height == 0 || stride < row_bytes {
            return Err(Error::CaptureUnavailable);
        }
        let needed = stride * (height as usize - 1) + row_bytes;
        if data.len() < needed {
            return Err(Error::CaptureUnavailable);
        }

        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in data.chunks(stride).take(height as usize) {
            pixels.extend_from_slice(&row[..row_bytes]);
        }
        let frame = Frame::from_bgra(width, height, pixels).ok_or(Error::CaptureUnavailable)?;
        *self.latest.lock() = Some(frame);
        Ok(())
    }

    /// Forget the current surface, e.g. when the host source goes away.
    pub fn clear(&self) {
        *self.latest.lock() = None;
    }
}

impl CaptureSource for PushSource {
    fn capture_frame(&mut self) -> Option<Frame> {
        self.latest.lock().clone()
    }
}

/// Cycles over decoded still images
pub struct StillImageSource {
    images: Vec<BgraImage>,
    next: usize,
}

impl StillImageSource {
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut images = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let rgba = image::open(path)
                .map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e)))?
                .to_rgba8();
            debug!("Loaded {} ({}x{})", path.display(), rgba.width(), rgba.height());
            images.push(rgba_to_bgra(rgba));
        }
        if images.is_empty() {
            return Err(Error::Configuration("no input images".to_string()));
        }
        info!("Still image source with {} images", images.len());
        Ok(Self { images, next: 0 })
    }

    pub fn from_images(images: Vec<BgraImage>) -> Self {
        Self { images, next: 0 }
    }
}

impl CaptureSource for StillImageSource {
    fn capture_frame(&mut self) -> Option<Frame> {
        if self.images.is_empty() {
            return None;
        }
        let image = self.images[self.next % self.images.len()].clone();
        self.next = (self.next + 1) % self.images.len();
        Some(Frame::new(image))
    }
}

fn rgba_to_bgra(mut image: image::RgbaImage) -> BgraImage {
    for pixel in image.pixels_mut() {
        let Rgba([r, g, b, a]) = *pixel;
        *pixel = Rgba([b, g, r, a]);
    }
    image
}

/// Swap a BGRA image back to RGBA for encoding.
pub fn bgra_to_rgba(image: &BgraImage) -> image::RgbaImage {
    rgba_to_bgra(image.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_respects_stride() {
        let source = PushSource::new();
        // 2x2 image, 12-byte rows with 4 bytes of padding
        let mut data = vec![0u8; 24];
        data[0..8].copy_from_slice(&[1, 1, 1, 255, 2, 2, 2, 255]);
        data[8..12].copy_from_slice(&[9, 9, 9, 9]);
        data[12..20].copy_from_slice(&[3, 3, 3, 255, 4, 4, 4, 255]);

        source.push(&data, 2, 2, 12).unwrap();
        let frame = source.clone().capture_frame().unwrap();
        assert_eq!(frame.dimensions(), (2, 2));
        assert_eq!(frame.image.get_pixel(0, 1), &Rgba([3, 3, 3, 255]));
        assert_eq!(frame.image.get_pixel(1, 1), &Rgba([4, 4, 4, 255]));
    }

    #[test]
    fn test_push_rejects_short_buffer() {
        let source = PushSource::new();
        assert!(matches!(
            source.push(&[0u8; 10], 2, 2, 8),
            Err(Error::CaptureUnavailable)
        ));
        assert!(source.push(&[0u8; 16], 2, 2, 4).is_err());
    }

    #[test]
    fn test_empty_push_source_captures_nothing() {
        let mut source = PushSource::new();
        assert!(source.capture_frame().is_none());
        source.push(&[0u8; 4], 1, 1, 4).unwrap();
        assert!(source.capture_frame().is_some());
        source.clear();
        assert!(source.capture_frame().is_none());
    }

    #[test]
    fn test_still_images_cycle() {
        let a = BgraImage::from_pixel(1, 1, Rgba([1, 0, 0, 255]));
        let b = BgraImage::from_pixel(1, 1, Rgba([2, 0, 0, 255]));
        let mut source = StillImageSource::from_images(vec![a, b]);

        let seq: Vec<u8> = (0..3)
            .map(|_| source.capture_frame().unwrap().image.get_pixel(0, 0)[0])
            .collect();
        assert_eq!(seq, vec![1, 2, 1]);
    }

    #[test]
    fn test_open_png_swaps_channels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("red.png");
        image::RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255]))
            .save(&path)
            .unwrap();

        let mut source = StillImageSource::open(&[&path]).unwrap();
        let frame = source.capture_frame().unwrap();
        assert_eq!(frame.image.get_pixel(0, 0), &Rgba([0, 0, 255, 255]));
    }
}
