//! EdgeYOLO style detectors (bundled COCO models and external graphs).
//!
//! The network emits one row per anchor: `[cx, cy, w, h, objectness,
//! class scores...]` in letterboxed model space.

use ndarray::{ArrayView2, Ix3};
use tracing::{debug, warn};

use super::preprocess::{letterbox, to_blob};
use super::session::OnnxSession;
use super::ModelSpec;
use crate::error::{Error, Result};
use crate::nms;
use crate::types::{BgrImage, Detection, DetectionSet, Rect};

pub struct EdgeYolo {
    session: OnnxSession,
    output_name: String,
    confidence_threshold: f32,
    nms_threshold: f32,
}

impl EdgeYolo {
    pub fn load(spec: &ModelSpec) -> Result<Self> {
        let session = OnnxSession::load(spec)?;
        let output_name = session
            .output_names()
            .into_iter()
            .next()
            .ok_or_else(|| Error::ModelLoad("model has no outputs".to_string()))?;

        Ok(Self {
            session,
            output_name,
            confidence_threshold: spec.confidence_threshold,
            nms_threshold: spec.nms_threshold,
        })
    }

    pub fn set_confidence_threshold(&mut self, threshold: f32) {
        self.confidence_threshold = threshold;
    }

    pub fn infer(&mut self, image: &BgrImage) -> Result<DetectionSet> {
        let (input_w, input_h) = self.session.input_size();
        let boxed = letterbox(image, input_w, input_h);
        let mut outputs = self.session.run(to_blob(&boxed.image))?;

        let pred = outputs
            .remove(&self.output_name)
            .ok_or_else(|| Error::Inference(format!("missing output {}", self.output_name)))?;
        let pred = pred
            .into_dimensionality::<Ix3>()
            .map_err(|e| Error::Inference(e.to_string()))?;
        let pred = pred.index_axis(ndarray::Axis(0), 0);

        let (img_w, img_h) = image.dimensions();
        let candidates = decode(
            pred,
            self.confidence_threshold,
            boxed.ratio,
            img_w as f32,
            img_h as f32,
        );
        let detections = nms::apply(candidates, self.nms_threshold);
        debug!("EdgeYOLO produced {} detections", detections.len());
        Ok(detections)
    }
}

/// Turn prediction rows into image-space candidates above `threshold`.
pub(crate) fn decode(
    pred: ArrayView2<f32>,
    threshold: f32,
    ratio: f32,
    img_w: f32,
    img_h: f32,
) -> DetectionSet {
    let mut out = Vec::new();
    if pred.ncols() < 6 || ratio <= 0.0 {
        warn!("Unexpected prediction shape {:?}", pred.shape());
        return out;
    }

    let max_x = (img_w - 1.0).max(0.0);
    let max_y = (img_h - 1.0).max(0.0);

    for row in pred.rows() {
        let objectness = row[4];
        if objectness <= threshold {
            continue;
        }
        let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
        let x0 = ((cx - w * 0.5) / ratio).clamp(0.0, max_x);
        let y0 = ((cy - h * 0.5) / ratio).clamp(0.0, max_y);
        let x1 = ((cx + w * 0.5) / ratio).clamp(0.0, max_x);
        let y1 = ((cy + h * 0.5) / ratio).clamp(0.0, max_y);

        for (class, score) in row.iter().skip(5).enumerate() {
            let prob = objectness * score;
            if prob > threshold {
                out.push(Detection::new(
                    class as u32,
                    prob,
                    Rect::new(x0, y0, x1 - x0, y1 - y0),
                ));
            }
        }
    }
    out
}
