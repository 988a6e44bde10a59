//! Core types shared by the pipeline stages.

use std::time::Instant;

use image::{ImageBuffer, Rgb, Rgba};
use serde::{Deserialize, Serialize};

/// 8-bit BGRA image as delivered by the compositor.
///
/// Stored in an `Rgba<u8>` buffer; channel order is B, G, R, A.
pub type BgraImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// 8-bit BGR image handed to the inference engine.
///
/// Stored in an `Rgb<u8>` buffer; channel order is B, G, R.
pub type BgrImage = ImageBuffer<Rgb<u8>, Vec<u8>>;

/// A captured video frame. Never mutated after capture except by the
/// preview/render stages, which always work on their own clone.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: BgraImage,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(image: BgraImage) -> Self {
        Self {
            image,
            captured_at: Instant::now(),
        }
    }

    /// Build a frame from a tightly packed BGRA buffer.
    ///
    /// Returns `None` if `data` is not exactly `width * height * 4` bytes.
    pub fn from_bgra(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        ImageBuffer::from_raw(width, height, data).map(Self::new)
    }

    /// Uniformly filled frame, mostly useful for tests and placeholders.
    pub fn filled(width: u32, height: u32, bgra: [u8; 4]) -> Self {
        Self::new(ImageBuffer::from_pixel(width, height, Rgba(bgra)))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Axis-aligned rectangle in pixel coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// X coordinate of top-left corner (pixels)
    pub x: f32,
    /// Y coordinate of top-left corner (pixels)
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Area, with negative extents counted as empty
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Area of the overlap with another rectangle
    pub fn intersection_area(&self, other: &Rect) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }
        (x2 - x1) * (y2 - y1)
    }

    /// Intersection over union. A zero or negative union counts as no overlap.
    pub fn iou(&self, other: &Rect) -> f32 {
        let intersection = self.intersection_area(other);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Shift by an offset, keeping the size.
    pub fn translate(&self, dx: f32, dy: f32) -> Rect {
        Rect {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }
}

/// A single detected object.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Full-frame coordinates once the worker has remapped it
    pub rect: Rect,
    /// Class/label ID (model-specific)
    pub label: u32,
    /// Confidence score 0.0-1.0
    pub confidence: f32,
    /// Assigned by the worker, increasing across frames
    pub id: u64,
}

impl Detection {
    pub fn new(label: u32, confidence: f32, rect: Rect) -> Self {
        Self {
            rect,
            label,
            confidence,
            id: 0,
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }
}

/// Detections produced by one inference pass, in engine output order until
/// NMS reorders them by confidence.
pub type DetectionSet = Vec<Detection>;
