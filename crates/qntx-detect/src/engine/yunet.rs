//! YuNet face detector.
//!
//! Anchor-free heads at strides 8, 16 and 32, each with `cls_*`, `obj_*` and
//! `bbox_*` outputs. Candidates are returned without suppression.

use tracing::debug;

use super::preprocess::{letterbox, to_blob};
use super::session::OnnxSession;
use super::ModelSpec;
use crate::error::{Error, Result};
use crate::types::{BgrImage, Detection, DetectionSet, Rect};

const STRIDES: [u32; 3] = [8, 16, 32];

pub struct YuNet {
    session: OnnxSession,
    confidence_threshold: f32,
}

/// Output tensors of one stride, flattened
pub(crate) struct Level<'a> {
    pub stride: u32,
    pub cls: &'a [f32],
    pub obj: &'a [f32],
    pub bbox: &'a [f32],
}

impl YuNet {
    pub fn load(spec: &ModelSpec) -> Result<Self> {
        let session = OnnxSession::load(spec)?;
        let names = session.output_names();
        for stride in STRIDES {
            for head in ["cls", "obj", "bbox"] {
                let name = format!("{head}_{stride}");
                if !names.contains(&name) {
                    return Err(Error::ModelLoad(format!("missing output {name}")));
                }
            }
        }

        Ok(Self {
            session,
            confidence_threshold: spec.confidence_threshold,
        })
    }

    pub fn set_confidence_threshold(&mut self, threshold: f32) {
        self.confidence_threshold = threshold;
    }

    pub fn infer(&mut self, image: &BgrImage) -> Result<DetectionSet> {
        let (input_w, input_h) = self.session.input_size();
        let boxed = letterbox(image, input_w, input_h);
        let outputs = self.session.run(to_blob(&boxed.image))?;

        let (img_w, img_h) = image.dimensions();
        let mut detections = Vec::new();
        for stride in STRIDES {
            let tensor = |head: &'static str| {
                let name = format!("{head}_{stride}");
                outputs
                    .get(&name)
                    .and_then(|t| t.as_slice())
                    .ok_or_else(|| Error::Inference(format!("missing output {name}")))
            };
            let level = Level {
                stride,
                cls: tensor("cls")?,
                obj: tensor("obj")?,
                bbox: tensor("bbox")?,
            };
            decode_level(
                &level,
                input_w / stride,
                self.confidence_threshold,
                boxed.ratio,
                (img_w as f32, img_h as f32),
                &mut detections,
            );
        }

        debug!("YuNet produced {} candidates", detections.len());
        Ok(detections)
    }
}

/// Decode one stride level into image-space candidates.
pub(crate) fn decode_level(
    level: &Level<'_>,
    cols: u32,
    threshold: f32,
    ratio: f32,
    (img_w, img_h): (f32, f32),
    out: &mut DetectionSet,
) {
    if cols == 0 || ratio <= 0.0 {
        return;
    }
    let stride = level.stride as f32;
    let max_x = (img_w - 1.0).max(0.0);
    let max_y = (img_h - 1.0).max(0.0);

    let anchors = level
        .cls
        .len()
        .min(level.obj.len())
        .min(level.bbox.len() / 4);
    for i in 0..anchors {
        let cls = level.cls[i].clamp(0.0, 1.0);
        let obj = level.obj[i].clamp(0.0, 1.0);
        let score = (cls * obj).sqrt();
        if score <= threshold {
            continue;
        }

        let col = (i as u32 % cols) as f32;
        let row = (i as u32 / cols) as f32;
        let b = &level.bbox[i * 4..i * 4 + 4];
        let cx = (col + b[0]) * stride;
        let cy = (row + b[1]) * stride;
        let w = b[2].exp() * stride;
        let h = b[3].exp() * stride;

        let x0 = ((cx - w * 0.5) / ratio).clamp(0.0, max_x);
        let y0 = ((cy - h * 0.5) / ratio).clamp(0.0, max_y);
        let x1 = ((cx + w * 0.5) / ratio).clamp(0.0, max_x);
        let y1 = ((cy + h * 0.5) / ratio).clamp(0.0, max_y);

        out.push(Detection::new(0, score, Rect::new(x0, y0, x1 - x0, y1 - y0)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_level_geometry() {
        // 2x2 grid at stride 8; only anchor 3 (row 1, col 1) fires
        let cls = [0.0, 0.0, 0.0, 0.81];
        let obj = [0.0, 0.0, 0.0, 1.0];
        let mut bbox = [0.0; 16];
        bbox[12..16].copy_from_slice(&[0.5, 0.5, 0.0, 0.0]);
        let level = Level {
            stride: 8,
            cls: &cls,
            obj: &obj,
            bbox: &bbox,
        };

        let mut out = Vec::new();
        decode_level(&level, 2, 0.5, 1.0, (100.0, 100.0), &mut out);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, 0);
        assert!((out[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(out[0].rect, Rect::new(8.0, 8.0, 8.0, 8.0));
    }

    #[test]
    fn test_decode_level_scales_back() {
        let cls = [1.0];
        let obj = [1.0];
        let bbox = [0.5, 0.5, 0.0, 0.0];
        let level = Level {
            stride: 32,
            cls: &cls,
            obj: &obj,
            bbox: &bbox,
        };

        let mut out = Vec::new();
        decode_level(&level, 1, 0.5, 0.5, (640.0, 480.0), &mut out);
        assert_eq!(out[0].rect, Rect::new(0.0, 0.0, 64.0, 64.0));
    }

    #[test]
    fn test_low_scores_dropped() {
        let cls = [0.2, 0.3];
        let obj = [0.2, 0.3];
        let bbox = [0.0; 8];
        let level = Level {
            stride: 16,
            cls: &cls,
            obj: &obj,
            bbox: &bbox,
        };

        let mut out = Vec::new();
        decode_level(&level, 2, 0.5, 1.0, (100.0, 100.0), &mut out);
        assert!(out.is_empty());
    }
}
