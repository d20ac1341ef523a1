//! SCRFD face locator via ONNX Runtime.
//!
//! Only the score and box heads are decoded; landmarks are not needed to
//! crop a face for expression and age/gender analysis.

use crate::analyzer::open_session;
use crate::error::{AssetLoadError, InferenceError};
use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_SCORE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_IOU: f32 = 0.4;
const SCRFD_STRIDES: [u32; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Scale and padding applied when fitting a frame into the square input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Finds faces in grayscale frames.
pub struct FaceLocator {
    session: Session,
    /// (score, bbox) output indices per stride.
    heads: [(usize, usize); 3],
}

impl FaceLocator {
    pub fn load(model_path: &Path) -> Result<Self, AssetLoadError> {
        let session = open_session(model_path)?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if names.len() < 6 {
            return Err(AssetLoadError::Incompatible {
                model: model_path.display().to_string(),
                detail: format!("SCRFD needs score and bbox heads for 3 strides, got {} outputs", names.len()),
            });
        }

        let heads = head_layout(&names);
        tracing::debug!(?heads, "SCRFD head layout");

        Ok(Self { session, heads })
    }

    /// Faces in `frame`, highest confidence first.
    pub fn locate(&mut self, frame: &GrayImage) -> Result<Vec<BoundingBox>, InferenceError> {
        let (input, letterbox) = letterbox(frame, SCRFD_INPUT_SIZE);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.heads[slot];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| InferenceError::Failed(format!("scores stride {stride}: {e}")))?;
            let (_, deltas) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| InferenceError::Failed(format!("bboxes stride {stride}: {e}")))?;

            candidates.extend(decode_stride(scores, deltas, stride, &letterbox));
        }

        Ok(suppress(candidates, SCRFD_NMS_IOU))
    }
}

/// Map output names to per-stride (score, bbox) indices.
///
/// Exports that name their heads `score_8`, `bbox_8`, … are matched by name;
/// anything else uses the usual positional order (scores 0–2, boxes 3–5).
fn head_layout(names: &[String]) -> [(usize, usize); 3] {
    let find = |prefix: &str, stride: u32| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let mut named = [(0, 0); 3];
    for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride)) {
            (Some(score), Some(bbox)) => named[slot] = (score, bbox),
            _ => return [(0, 3), (1, 4), (2, 5)],
        }
    }
    named
}

/// Fit `frame` into a `size`×`size` NCHW tensor, padding with the mean.
fn letterbox(frame: &GrayImage, size: u32) -> (Array4<f32>, Letterbox) {
    let (width, height) = frame.dimensions();
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, size);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let resized = imageops::resize(frame, new_w, new_h, FilterType::Triangle);

    let side = size as usize;
    let tensor = Array4::from_shape_fn((1, 3, side, side), |(_, _, y, x)| {
        let (x, y) = (x as u32, y as u32);
        let inside = x >= pad_x && x < pad_x + new_w && y >= pad_y && y < pad_y + new_h;
        let pixel = if inside {
            resized.get_pixel(x - pad_x, y - pad_y)[0] as f32
        } else {
            SCRFD_MEAN
        };
        (pixel - SCRFD_MEAN) / SCRFD_STD
    });

    (
        tensor,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    )
}

/// Turn one stride's score/box heads into frame-space boxes above threshold.
fn decode_stride(scores: &[f32], deltas: &[f32], stride: u32, letterbox: &Letterbox) -> Vec<BoundingBox> {
    let cells_per_row = (SCRFD_INPUT_SIZE / stride) as usize;
    let step = stride as f32;

    scores
        .iter()
        .enumerate()
        .filter(|(_, score)| **score > SCRFD_SCORE_THRESHOLD)
        .filter_map(|(idx, &score)| {
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let anchor_x = (cell % cells_per_row) as f32 * step;
            let anchor_y = (cell / cells_per_row) as f32 * step;

            let d = deltas.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.unmap(anchor_x - d[0] * step, anchor_y - d[1] * step);
            let (x2, y2) = letterbox.unmap(anchor_x + d[2] * step, anchor_y + d[3] * step);

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; output is sorted by confidence.
fn suppress(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence }
    }

    #[test]
    fn test_suppress_drops_overlaps() {
        let kept = suppress(
            vec![
                bbox(5.0, 5.0, 100.0, 100.0, 0.8),
                bbox(0.0, 0.0, 100.0, 100.0, 0.9),
                bbox(200.0, 200.0, 50.0, 50.0, 0.7),
            ],
            0.4,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.7);
    }

    #[test]
    fn test_suppress_empty() {
        assert!(suppress(Vec::new(), 0.4).is_empty());
    }

    #[test]
    fn test_head_layout_by_name() {
        let names: Vec<String> = ["bbox_8", "score_8", "bbox_16", "score_16", "bbox_32", "score_32"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(head_layout(&names), [(1, 0), (3, 2), (5, 4)]);
    }

    #[test]
    fn test_head_layout_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| (440 + i).to_string()).collect();
        assert_eq!(head_layout(&names), [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_letterbox_pads_short_side() {
        let frame = GrayImage::from_pixel(320, 160, image::Luma([255]));
        let (tensor, lb) = letterbox(&frame, 64);
        assert_eq!(tensor.shape(), &[1, 3, 64, 64]);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 16.0);
        // Padding normalizes to zero, image content does not.
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert!(tensor[[0, 0, 32, 32]] > 0.9);
        assert_eq!(tensor[[0, 0, 32, 32]], tensor[[0, 2, 32, 32]]);
    }

    #[test]
    fn test_decode_stride_maps_back_to_frame() {
        let lb = Letterbox { scale: 2.0, pad_x: 0.0, pad_y: 80.0 };
        let cells = (SCRFD_INPUT_SIZE / 32) as usize;
        let mut scores = vec![0.0f32; cells * cells * SCRFD_ANCHORS_PER_CELL];
        let mut deltas = vec![0.0f32; scores.len() * 4];

        // Anchor at cell (row 3, col 2) → (64, 96) in input space.
        let idx = (3 * cells + 2) * SCRFD_ANCHORS_PER_CELL;
        scores[idx] = 0.9;
        deltas[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let boxes = decode_stride(&scores, &deltas, 32, &lb);
        assert_eq!(boxes.len(), 1);
        let b = &boxes[0];
        // x: (64 - 32) / 2 = 16 .. (64 + 32) / 2 = 48
        assert!((b.x - 16.0).abs() < 1e-4);
        assert!((b.width - 32.0).abs() < 1e-4);
        // y: (96 - 32 - 80) / 2 = -8 .. (96 + 32 - 80) / 2 = 24
        assert!((b.y + 8.0).abs() < 1e-4);
        assert!((b.height - 32.0).abs() < 1e-4);
        assert_eq!(b.confidence, 0.9);
    }

    #[test]
    fn test_decode_stride_ignores_low_scores() {
        let lb = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let scores = vec![0.5f32, 0.2, 0.49];
        let deltas = vec![1.0f32; 12];
        assert!(decode_stride(&scores, &deltas, 32, &lb).is_empty());
    }
}
