//! Preview drawing: detection boxes, crop guide and the centre reticle.
//!
//! Colours are given in BGRA order to match the frame buffers.

use image::Rgba;
use imageproc::drawing::{draw_hollow_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect as PixelRect;

use crate::config::CropRect;
use crate::types::{BgraImage, Detection};

const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);
const RED: Rgba<u8> = Rgba([0, 0, 255, 255]);

const BOX_THICKNESS: u32 = 2;
const DASH_LEN: u32 = 10;
const RETICLE_ARM: f32 = 30.0;
const RETICLE_RADIUS: i32 = 50;

/// Per-class box colours (BGRA)
const PALETTE: [[u8; 4]; 8] = [
    [56, 56, 255, 255],
    [151, 157, 255, 255],
    [31, 112, 255, 255],
    [29, 178, 255, 255],
    [49, 210, 207, 255],
    [10, 249, 72, 255],
    [187, 212, 0, 255],
    [255, 194, 0, 255],
];

pub fn label_color(label: u32) -> Rgba<u8> {
    Rgba(PALETTE[label as usize % PALETTE.len()])
}

fn clipped(image: &BgraImage, x: f32, y: f32, w: f32, h: f32) -> Option<PixelRect> {
    let (img_w, img_h) = image.dimensions();
    let x0 = x.max(0.0).floor() as i64;
    let y0 = y.max(0.0).floor() as i64;
    let x1 = ((x + w).ceil() as i64).min(img_w as i64);
    let y1 = ((y + h).ceil() as i64).min(img_h as i64);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(PixelRect::at(x0 as i32, y0 as i32).of_size((x1 - x0) as u32, (y1 - y0) as u32))
}

/// Draw a hollow rectangle `BOX_THICKNESS` pixels wide, growing inwards.
fn thick_rect(image: &mut BgraImage, rect: PixelRect, color: Rgba<u8>) {
    for inset in 0..BOX_THICKNESS {
        let w = rect.width().saturating_sub(2 * inset);
        let h = rect.height().saturating_sub(2 * inset);
        if w == 0 || h == 0 {
            break;
        }
        let r = PixelRect::at(rect.left() + inset as i32, rect.top() + inset as i32).of_size(w, h);
        draw_hollow_rect_mut(image, r, color);
    }
}

pub fn draw_detections(image: &mut BgraImage, detections: &[Detection]) {
    for det in detections {
        let r = &det.rect;
        if let Some(rect) = clipped(image, r.x, r.y, r.width, r.height) {
            thick_rect(image, rect, label_color(det.label));
        }
    }
}

fn dashed_line(image: &mut BgraImage, from: (f32, f32), to: (f32, f32), color: Rgba<u8>) {
    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    let length = (dx * dx + dy * dy).sqrt();
    if length <= 0.0 {
        return;
    }
    let (ux, uy) = (dx / length, dy / length);
    let mut t = 0.0;
    while t < length {
        let end = (t + DASH_LEN as f32).min(length);
        draw_line_segment_mut(
            image,
            (from.0 + ux * t, from.1 + uy * t),
            (from.0 + ux * end, from.1 + uy * end),
            color,
        );
        t += 2.0 * DASH_LEN as f32;
    }
}

/// Dashed green outline of the crop region. Nothing is drawn for a full frame.
pub fn draw_crop_guide(image: &mut BgraImage, crop: CropRect) {
    let (w, h) = image.dimensions();
    if crop.is_full_frame(w, h) || crop.width == 0 || crop.height == 0 {
        return;
    }
    let left = crop.x as f32;
    let top = crop.y as f32;
    let right = (crop.x + crop.width - 1) as f32;
    let bottom = (crop.y + crop.height - 1) as f32;

    dashed_line(image, (left, top), (right, top), GREEN);
    dashed_line(image, (right, top), (right, bottom), GREEN);
    dashed_line(image, (right, bottom), (left, bottom), GREEN);
    dashed_line(image, (left, bottom), (left, top), GREEN);
}

/// Green crosshair and red circle at the frame centre.
pub fn draw_reticle(image: &mut BgraImage) {
    let (w, h) = image.dimensions();
    let cx = (w / 2) as f32;
    let cy = (h / 2) as f32;

    for offset in 0..2 {
        let o = offset as f32;
        draw_line_segment_mut(
            image,
            (cx - RETICLE_ARM, cy + o),
            (cx + RETICLE_ARM, cy + o),
            GREEN,
        );
        draw_line_segment_mut(
            image,
            (cx + o, cy - RETICLE_ARM),
            (cx + o, cy + RETICLE_ARM),
            GREEN,
        );
        draw_hollow_circle_mut(image, (cx as i32, cy as i32), RETICLE_RADIUS - offset, RED);
    }
}

/// Full preview: boxes plus crop guide on a copy of the frame.
pub fn compose_preview(frame: &BgraImage, detections: &[Detection], crop: CropRect) -> BgraImage {
    let mut image = frame.clone();
    draw_detections(&mut image, detections);
    draw_crop_guide(&mut image, crop);
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rect;

    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    #[test]
    fn test_boxes_are_two_pixels_wide() {
        let frame = BgraImage::from_pixel(100, 100, BLACK);
        let det = Detection::new(3, 0.9, Rect::new(10.0, 10.0, 50.0, 50.0));
        let out = compose_preview(&frame, &[det], CropRect::full(100, 100));

        assert_eq!(out.get_pixel(10, 30), &label_color(3));
        assert_eq!(out.get_pixel(11, 30), &label_color(3));
        assert_eq!(out.get_pixel(12, 30), &BLACK);
        assert_eq!(out.get_pixel(30, 30), &BLACK);
    }

    #[test]
    fn test_out_of_frame_box_is_clipped() {
        let mut frame = BgraImage::from_pixel(20, 20, BLACK);
        let det = Detection::new(0, 0.9, Rect::new(-10.0, -10.0, 15.0, 15.0));
        draw_detections(&mut frame, &[det]);
        assert_eq!(frame.get_pixel(0, 0), &label_color(0));

        let gone = Detection::new(0, 0.9, Rect::new(50.0, 50.0, 5.0, 5.0));
        draw_detections(&mut frame, &[gone]);
    }

    #[test]
    fn test_crop_guide_is_dashed() {
        let mut frame = BgraImage::from_pixel(100, 100, BLACK);
        let crop = CropRect {
            x: 10,
            y: 10,
            width: 80,
            height: 80,
        };
        draw_crop_guide(&mut frame, crop);

        assert_eq!(frame.get_pixel(12, 10), &GREEN);
        assert_eq!(frame.get_pixel(25, 10), &BLACK);
    }

    #[test]
    fn test_full_frame_has_no_guide() {
        let mut frame = BgraImage::from_pixel(10, 10, BLACK);
        draw_crop_guide(&mut frame, CropRect::full(10, 10));
        assert!(frame.pixels().all(|p| *p == BLACK));
    }

    #[test]
    fn test_reticle_centre() {
        let mut frame = BgraImage::from_pixel(200, 200, BLACK);
        draw_reticle(&mut frame);

        assert_eq!(frame.get_pixel(100, 100), &GREEN);
        assert_eq!(frame.get_pixel(125, 100), &GREEN);
        assert_eq!(frame.get_pixel(150, 100), &RED);
        assert_eq!(frame.get_pixel(0, 0), &BLACK);
    }
}
