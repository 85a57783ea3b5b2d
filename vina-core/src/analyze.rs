//! The detection contract consumed by recognition and enrollment, and its
//! ONNX-backed implementation (SCRFD detection, alignment, ArcFace embedding).

use crate::align;
use crate::config::Config;
use crate::detect::{BoundingBox, DetectionError, ScrfdDetector};
use crate::embed::{Embedding, FaceEmbedder};
use crate::runtime::OnnxRuntime;
use crate::Error;
use image::RgbImage;

/// One face found in a frame
#[derive(Debug, Clone)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    /// `None` when the face was too poor to embed; such a face can't be matched
    pub embedding: Option<Embedding>,
}

impl FaceDetection {
    pub fn new(bbox: BoundingBox, embedding: Option<Embedding>) -> Self {
        Self {
            bbox,
            confidence: 1.0,
            embedding,
        }
    }
}

/// Anything that can find faces in a frame
pub trait Detector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceDetection>, DetectionError>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceDetection>, DetectionError> {
        (**self).detect(frame)
    }
}

/// SCRFD + ArcFace pipeline
pub struct FaceAnalyzer {
    detector: ScrfdDetector,
    embedder: FaceEmbedder,
}

impl FaceAnalyzer {
    /// Load both models; any failure is a startup failure
    pub fn new(config: &Config) -> Result<Self, Error> {
        let runtime = OnnxRuntime::new();

        log::info!("Loading face detection model...");
        let detector = ScrfdDetector::new(
            &config.detection.model_path,
            &runtime,
            config.detection.confidence_threshold,
            config.detection.nms_threshold,
        )?;

        log::info!("Loading face embedding model...");
        let embedder = FaceEmbedder::new(&config.embedding.model_path, &runtime)?;

        Ok(Self { detector, embedder })
    }

    fn embed_face(&mut self, frame: &RgbImage, face: &crate::detect::DetectedFace) -> Option<Embedding> {
        let aligned = match align::align_face(frame, &face.landmarks) {
            Ok(aligned) => aligned,
            Err(e) => {
                log::debug!("Face alignment failed: {}", e);
                return None;
            }
        };

        match self.embedder.embed(&aligned) {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                log::debug!("Embedding generation failed: {}", e);
                None
            }
        }
    }
}

impl Detector for FaceAnalyzer {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceDetection>, DetectionError> {
        let faces = self.detector.detect(frame)?;

        let mut detections = Vec::with_capacity(faces.len());
        for face in &faces {
            let embedding = self.embed_face(frame, face);
            detections.push(FaceDetection {
                bbox: face.bbox,
                confidence: face.confidence,
                embedding,
            });
        }

        Ok(detections)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;

    /// Detector returning scripted results, one per call; repeats the last one.
    /// Keeps every frame it was given.
    pub struct ScriptedDetector {
        script: VecDeque<Result<Vec<FaceDetection>, String>>,
        last: Vec<FaceDetection>,
        pub calls: usize,
        pub frames: Vec<RgbImage>,
    }

    impl ScriptedDetector {
        pub fn new(script: Vec<Vec<FaceDetection>>) -> Self {
            Self {
                script: script.into_iter().map(Ok).collect(),
                last: Vec::new(),
                calls: 0,
                frames: Vec::new(),
            }
        }

        pub fn always(faces: Vec<FaceDetection>) -> Self {
            Self::new(vec![faces])
        }

        pub fn failing(message: &str) -> Self {
            Self {
                script: VecDeque::from(vec![Err(message.to_string())]),
                last: Vec::new(),
                calls: 0,
                frames: Vec::new(),
            }
        }
    }

    impl Detector for ScriptedDetector {
        fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceDetection>, DetectionError> {
            self.calls += 1;
            self.frames.push(frame.clone());
            match self.script.pop_front() {
                Some(Ok(faces)) => {
                    self.last = faces.clone();
                    Ok(faces)
                }
                Some(Err(message)) => Err(DetectionError::Inference(message)),
                None => Ok(self.last.clone()),
            }
        }
    }
}
