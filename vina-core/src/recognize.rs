use crate::analyze::Detector;
use crate::compare::{best_match, MatchOutcome};
use crate::detect::{BoundingBox, DetectionError};
use crate::select;
use crate::store::EnrolledFace;
use image::RgbImage;

/// What one detection pass found
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionResult {
    NoFace,
    /// A face was found but nobody in the store matched it ("Unknown")
    Unmatched { bbox: BoundingBox },
    Matched {
        name: String,
        bbox: BoundingBox,
        similarity: f32,
    },
}

impl RecognitionResult {
    pub fn bbox(&self) -> Option<BoundingBox> {
        match self {
            RecognitionResult::NoFace => None,
            RecognitionResult::Unmatched { bbox } | RecognitionResult::Matched { bbox, .. } => {
                Some(*bbox)
            }
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            RecognitionResult::Matched { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }
}

/// Detect, pick the center-most face and match it against `faces`
pub fn recognize<D: Detector + ?Sized>(
    detector: &mut D,
    frame: &RgbImage,
    faces: &[EnrolledFace],
    threshold: f32,
) -> Result<RecognitionResult, DetectionError> {
    let detections = detector.detect(frame)?;

    let Some(target) = select::center_most(&detections, frame.width(), frame.height()) else {
        return Ok(RecognitionResult::NoFace);
    };
    let bbox = target.bbox;

    let Some(embedding) = &target.embedding else {
        log::warn!("Face detected but embedding could not be extracted");
        return Ok(RecognitionResult::Unmatched { bbox });
    };

    Ok(match best_match(embedding, faces, threshold) {
        MatchOutcome::Matched { name, similarity } => {
            log::debug!("Recognized '{}' (similarity {:.3})", name, similarity);
            RecognitionResult::Matched {
                name,
                bbox,
                similarity,
            }
        }
        MatchOutcome::Unmatched => RecognitionResult::Unmatched { bbox },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::testing::ScriptedDetector;
    use crate::analyze::FaceDetection;
    use ndarray::arr1;

    fn known() -> Vec<EnrolledFace> {
        vec![EnrolledFace {
            name: "Alice".to_string(),
            embedding: arr1(&[1.0, 0.0]),
        }]
    }

    #[test]
    fn test_no_face() {
        let mut detector = ScriptedDetector::always(vec![]);
        let result = recognize(&mut detector, &RgbImage::new(100, 100), &known(), 0.5).unwrap();
        assert_eq!(result, RecognitionResult::NoFace);
        assert_eq!(result.bbox(), None);
    }

    #[test]
    fn test_matched_center_face() {
        let center = BoundingBox::new(40.0, 40.0, 60.0, 60.0);
        let mut detector = ScriptedDetector::always(vec![
            FaceDetection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), Some(arr1(&[0.0, 1.0]))),
            FaceDetection::new(center, Some(arr1(&[1.0, 0.0]))),
        ]);

        let result = recognize(&mut detector, &RgbImage::new(100, 100), &known(), 0.5).unwrap();
        assert_eq!(result.name(), Some("Alice"));
        assert_eq!(result.bbox(), Some(center));
    }

    #[test]
    fn test_missing_embedding_is_unknown() {
        let bbox = BoundingBox::new(40.0, 40.0, 60.0, 60.0);
        let mut detector = ScriptedDetector::always(vec![FaceDetection::new(bbox, None)]);

        let result = recognize(&mut detector, &RgbImage::new(100, 100), &known(), 0.5).unwrap();
        assert_eq!(result, RecognitionResult::Unmatched { bbox });
    }

    #[test]
    fn test_empty_store_is_unknown() {
        let bbox = BoundingBox::new(40.0, 40.0, 60.0, 60.0);
        let mut detector =
            ScriptedDetector::always(vec![FaceDetection::new(bbox, Some(arr1(&[1.0, 0.0])))]);

        let result = recognize(&mut detector, &RgbImage::new(100, 100), &[], 0.5).unwrap();
        assert_eq!(result, RecognitionResult::Unmatched { bbox });
    }
}
