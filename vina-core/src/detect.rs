use crate::runtime::OnnxRuntime;
use image::{imageops, RgbImage};
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Runtime error: {0}")]
    Runtime(#[from] crate::runtime::RuntimeError),
}

const INPUT_SIZE: u32 = 640;

/// SCRFD uses 3 feature pyramid levels with different strides
const FEATURE_STRIDES: [usize; 3] = [8, 16, 32];
const NUM_ANCHORS: usize = 2;

/// Axis-aligned face box in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// A box with no positive extent cannot be cropped
    pub fn is_degenerate(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            x1: self.x1 * factor,
            y1: self.y1 * factor,
            x2: self.x2 * factor,
            y2: self.y2 * factor,
        }
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FacialLandmarks {
    pub left_eye: (f32, f32),
    pub right_eye: (f32, f32),
    pub nose: (f32, f32),
    pub left_mouth: (f32, f32),
    pub right_mouth: (f32, f32),
}

impl FacialLandmarks {
    pub fn points(&self) -> [(f32, f32); 5] {
        [
            self.left_eye,
            self.right_eye,
            self.nose,
            self.left_mouth,
            self.right_mouth,
        ]
    }

    fn from_points(points: [(f32, f32); 5]) -> Self {
        Self {
            left_eye: points[0],
            right_eye: points[1],
            nose: points[2],
            left_mouth: points[3],
            right_mouth: points[4],
        }
    }
}

/// Raw SCRFD output: a box, its landmarks and score, before embedding
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub landmarks: FacialLandmarks,
    pub confidence: f32,
}

/// SCRFD face detector
pub struct ScrfdDetector {
    session: Session,
    confidence_threshold: f32,
    nms_threshold: f32,
}

impl ScrfdDetector {
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        runtime: &OnnxRuntime,
        confidence_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Self, DetectionError> {
        let session = runtime
            .create_session(model_path)
            .map_err(|e| DetectionError::ModelLoad(e.to_string()))?;

        Ok(Self {
            session,
            confidence_threshold,
            nms_threshold,
        })
    }

    /// Detect faces in an image; an empty vector means no face was found
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, DetectionError> {
        let (input_tensor, scale) = Self::preprocess(image);

        let input_value = Value::from_array(input_tensor)
            .map_err(|e| DetectionError::Inference(format!("Failed to create input tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(|e| DetectionError::Inference(e.to_string()))?;

        // Scores for each stride come first, then boxes, then keypoints
        if outputs.len() < FEATURE_STRIDES.len() * 3 {
            return Err(DetectionError::Inference(format!(
                "Expected {} outputs (3 strides x 3 tensors), got {}",
                FEATURE_STRIDES.len() * 3,
                outputs.len()
            )));
        }

        let mut detections = Vec::new();

        for (stride_idx, &stride) in FEATURE_STRIDES.iter().enumerate() {
            let feat_size = INPUT_SIZE as usize / stride;
            let anchors = Self::generate_anchors(stride, feat_size);

            let (_, score_data) = outputs[stride_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectionError::Inference(format!("Failed to extract scores for stride {}: {}", stride, e)))?;
            let (_, bbox_data) = outputs[stride_idx + 3]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectionError::Inference(format!("Failed to extract bboxes for stride {}: {}", stride, e)))?;
            let (_, kps_data) = outputs[stride_idx + 6]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectionError::Inference(format!("Failed to extract landmarks for stride {}: {}", stride, e)))?;

            for (anchor_idx, &anchor) in anchors.iter().enumerate() {
                for anchor_num in 0..NUM_ANCHORS {
                    let idx = anchor_idx * NUM_ANCHORS + anchor_num;

                    let Some(&score) = score_data.get(idx) else {
                        continue;
                    };
                    if score < self.confidence_threshold {
                        continue;
                    }

                    let (Some(bbox_pred), Some(kps_pred)) = (
                        bbox_data.get(idx * 4..idx * 4 + 4),
                        kps_data.get(idx * 10..idx * 10 + 10),
                    ) else {
                        continue;
                    };

                    let bbox = Self::decode_bbox(anchor, bbox_pred, stride as f32);
                    let landmarks = Self::decode_landmarks(anchor, kps_pred, stride as f32);

                    log::trace!(
                        "Detection: stride={}, score={:.3}, bbox=({:.1},{:.1},{:.1},{:.1})",
                        stride, score, bbox.x1, bbox.y1, bbox.x2, bbox.y2
                    );

                    detections.push(DetectedFace {
                        bbox: bbox.scaled(1.0 / scale),
                        landmarks: FacialLandmarks::from_points(
                            landmarks.map(|(x, y)| (x / scale, y / scale)),
                        ),
                        confidence: score,
                    });
                }
            }
        }

        log::debug!("Found {} detections before NMS", detections.len());

        Ok(Self::nms(detections, self.nms_threshold))
    }

    /// Generate anchor centers for a given stride
    fn generate_anchors(stride: usize, feat_size: usize) -> Vec<(f32, f32)> {
        let mut anchors = Vec::with_capacity(feat_size * feat_size);
        for i in 0..feat_size {
            for j in 0..feat_size {
                anchors.push(((j * stride) as f32, (i * stride) as f32));
            }
        }
        anchors
    }

    /// Decode distance-to-edge predictions into a box
    fn decode_bbox(anchor: (f32, f32), pred: &[f32], stride: f32) -> BoundingBox {
        let (cx, cy) = anchor;
        BoundingBox {
            x1: cx - pred[0] * stride,
            y1: cy - pred[1] * stride,
            x2: cx + pred[2] * stride,
            y2: cy + pred[3] * stride,
        }
    }

    fn decode_landmarks(anchor: (f32, f32), pred: &[f32], stride: f32) -> [(f32, f32); 5] {
        let (cx, cy) = anchor;
        let mut points = [(0.0, 0.0); 5];
        for (k, point) in points.iter_mut().enumerate() {
            *point = (cx + pred[k * 2] * stride, cy + pred[k * 2 + 1] * stride);
        }
        points
    }

    /// Letterbox the image into the 640x640 input (top-left aligned) and
    /// normalize to BGR NCHW with mean 127.5 and std 128.
    /// Returns the tensor and the resize scale applied.
    fn preprocess(image: &RgbImage) -> (([usize; 4], Vec<f32>), f32) {
        let (orig_width, orig_height) = image.dimensions();
        let scale = (INPUT_SIZE as f32 / orig_width.max(1) as f32)
            .min(INPUT_SIZE as f32 / orig_height.max(1) as f32);

        let new_width = ((orig_width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        let new_height = ((orig_height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        let resized = imageops::resize(image, new_width, new_height, imageops::FilterType::Triangle);

        // Padding keeps the normalized value of a black pixel
        let size = INPUT_SIZE as usize;
        let mut input_data = vec![-127.5 / 128.0; 3 * size * size];

        for (x, y, pixel) in resized.enumerate_pixels() {
            let offset = y as usize * size + x as usize;
            // RGB -> BGR
            for c in 0..3 {
                input_data[c * size * size + offset] = (pixel[2 - c] as f32 - 127.5) / 128.0;
            }
        }

        (([1, 3, size, size], input_data), scale)
    }

    /// Non-Maximum Suppression, returns detections sorted by confidence
    fn nms(mut detections: Vec<DetectedFace>, iou_threshold: f32) -> Vec<DetectedFace> {
        detections.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut keep: Vec<DetectedFace> = Vec::new();
        for candidate in detections {
            if keep
                .iter()
                .all(|kept| kept.bbox.iou(&candidate.bbox) <= iou_threshold)
            {
                keep.push(candidate);
            }
        }

        keep
    }
}
