//! Adding people to the known-faces store, from a still image or live from
//! the camera.

use crate::analyze::Detector;
use crate::capture::{read_with_retry, CaptureError, FrameSource};
use crate::config::Config;
use crate::detect::{BoundingBox, DetectionError};
use crate::display::{Display, DisplayError, Key};
use crate::embed::Embedding;
use crate::imaging;
use crate::select;
use crate::speech::Speaker;
use crate::store::{self, EnrolledFace, FaceStore, StorageError};
use crate::Error;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Debug, Error)]
pub enum EnrollError {
    #[error("Name cannot be empty")]
    EmptyName,
    #[error("Image not found: {}", .0.display())]
    ImageNotFound(PathBuf),
    #[error("Failed to read image {}: {source}", .path.display())]
    ImageRead {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("No face detected")]
    NoFace,
    #[error("Could not extract a face embedding")]
    NoEmbedding,
    #[error("'{0}' is already enrolled and was not overwritten")]
    OverwriteDeclined(String),
    #[error("Detection failed: {0}")]
    Detection(#[from] DetectionError),
    #[error("Failed to save known faces: {0}")]
    Storage(#[from] StorageError),
    #[error("Display error: {0}")]
    Display(#[from] DisplayError),
    #[error("Camera error: {0}")]
    Capture(#[from] CaptureError),
}

/// The person at the keyboard during enrollment
pub trait Operator {
    /// Raw name input; `None` at end of input
    fn ask_name(&mut self) -> Option<String>;

    /// Whether to replace the existing entry for `name`
    fn confirm_overwrite(&mut self, name: &str) -> bool;
}

/// Trimmed name, or `None` when the operator backed out
pub fn parse_name(input: Option<String>) -> Option<String> {
    let input = input?;
    let name = input.trim();
    if name.is_empty() || name.eq_ignore_ascii_case("cancel") {
        None
    } else {
        Some(name.to_string())
    }
}

/// Confirm a collision, then replace-or-append and persist. The returned list
/// is what was written; on any error nothing was.
fn commit(
    store: &FaceStore,
    faces: &[EnrolledFace],
    name: &str,
    embedding: Embedding,
    operator: &mut dyn Operator,
) -> Result<Vec<EnrolledFace>, EnrollError> {
    if store::contains(faces, name) && !operator.confirm_overwrite(name) {
        return Err(EnrollError::OverwriteDeclined(name.to_string()));
    }

    let updated = store::enroll(faces, name, embedding)?;
    store.save(&updated)?;
    Ok(updated)
}

/// Enroll the largest face in the image at `path` as `name`
pub fn enroll_from_image<D: Detector + ?Sized>(
    detector: &mut D,
    store: &FaceStore,
    path: &Path,
    name: &str,
    operator: &mut dyn Operator,
    speaker: &dyn Speaker,
) -> Result<Vec<EnrolledFace>, EnrollError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EnrollError::EmptyName);
    }

    if !path.exists() {
        return Err(EnrollError::ImageNotFound(path.to_path_buf()));
    }

    let image = image::open(path)
        .map_err(|source| EnrollError::ImageRead {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgb8();

    let detections = detector.detect(&image)?;
    log::debug!("{} face(s) in {}", detections.len(), path.display());

    let target = select::largest(&detections).ok_or(EnrollError::NoFace)?;
    let embedding = target.embedding.clone().ok_or(EnrollError::NoEmbedding)?;

    let faces = store.load();
    let updated = commit(store, &faces, name, embedding, operator)?;

    log::info!("Enrolled '{}' from {}", name, path.display());
    speaker.speak(&format!("{} has been enrolled from image.", name));
    Ok(updated)
}

/// What a capture key press led to
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Enrolled(String),
    /// Operator cancelled at the name prompt
    Cancelled,
    /// Pressed again before the capture cooldown elapsed
    CoolingDown,
    /// No face in the preview to capture
    NoTarget,
}

/// Interactive enrollment from a live camera
pub struct LiveEnrollment<D, S> {
    config: Config,
    detector: D,
    store: FaceStore,
    faces: Vec<EnrolledFace>,
    speaker: S,
    preview: Option<BoundingBox>,
    last_preview: Option<Instant>,
    last_capture: Option<Instant>,
}

impl<D: Detector, S: Speaker> LiveEnrollment<D, S> {
    pub fn new(config: Config, detector: D, store: FaceStore, speaker: S) -> Self {
        let faces = store.load();
        Self {
            config,
            detector,
            store,
            faces,
            speaker,
            preview: None,
            last_preview: None,
            last_capture: None,
        }
    }

    pub fn faces(&self) -> &[EnrolledFace] {
        &self.faces
    }

    /// Throttled preview detection; returns the frame with the preview box
    /// drawn (red when the face is too small to enroll well)
    pub fn preview(&mut self, frame: &RgbImage, now: Instant) -> RgbImage {
        let interval = self.config.enrollment.preview_interval();
        let due = self
            .last_preview
            .map_or(true, |last| now.saturating_duration_since(last) > interval);

        if due {
            self.last_preview = Some(now);
            self.preview = match self.detector.detect(frame) {
                Ok(detections) => {
                    select::center_most(&detections, frame.width(), frame.height()).map(|d| d.bbox)
                }
                Err(e) => {
                    log::warn!("Preview detection failed: {}", e);
                    None
                }
            };
        }

        let mut rendered = frame.clone();
        if let Some(bbox) = &self.preview {
            let min = self.config.enrollment.min_face_size as f32;
            let color = if bbox.width() < min || bbox.height() < min {
                imaging::RED
            } else {
                imaging::GREEN
            };
            imaging::draw_box(&mut rendered, bbox, color);
        }
        rendered
    }

    /// Capture the face in `frame` (the frame shown when the key was pressed)
    pub fn capture<W: Display + ?Sized>(
        &mut self,
        frame: &RgbImage,
        now: Instant,
        display: &mut W,
        operator: &mut dyn Operator,
    ) -> Result<CaptureOutcome, EnrollError> {
        let cooldown = self.config.enrollment.capture_cooldown();
        if let Some(last) = self.last_capture {
            if now.saturating_duration_since(last) < cooldown {
                return Ok(CaptureOutcome::CoolingDown);
            }
        }
        self.last_capture = Some(now);

        if self.preview.is_none() {
            return Ok(CaptureOutcome::NoTarget);
        }

        let detections = self.detector.detect(frame)?;
        let target = select::center_most(&detections, frame.width(), frame.height())
            .ok_or(EnrollError::NoFace)?;

        let Some(embedding) = target.embedding.clone() else {
            if self.config.debug.save_screenshots {
                if let Err(e) =
                    imaging::save_debug_frame(frame, &self.config.debug.output_dir, "enroll_no_embedding")
                {
                    log::warn!("Failed to save debug frame: {}", e);
                }
            }
            return Err(EnrollError::NoEmbedding);
        };

        display.suspend()?;
        let result = self.prompt_and_commit(embedding, operator);
        display.resume()?;
        result
    }

    fn prompt_and_commit(
        &mut self,
        embedding: Embedding,
        operator: &mut dyn Operator,
    ) -> Result<CaptureOutcome, EnrollError> {
        let Some(name) = parse_name(operator.ask_name()) else {
            log::info!("Enrollment cancelled");
            return Ok(CaptureOutcome::Cancelled);
        };

        self.faces = commit(&self.store, &self.faces, &name, embedding, operator)?;

        log::info!("Enrolled '{}' ({} known faces)", name, self.faces.len());
        self.speaker.speak(&format!("{} has been enrolled.", name));
        Ok(CaptureOutcome::Enrolled(name))
    }

    /// Run until the quit key or until the camera gives up
    pub fn run<F, W>(
        &mut self,
        source: &mut F,
        display: &mut W,
        operator: &mut dyn Operator,
    ) -> Result<(), Error>
    where
        F: FrameSource + ?Sized,
        W: Display + ?Sized,
    {
        log::info!(
            "Enrollment started with {} known faces (s: capture, q: quit)",
            self.faces.len()
        );

        loop {
            let frame = read_with_retry(
                source,
                self.config.camera.max_read_failures,
                self.config.camera.retry_delay(),
            )?;

            let rendered = self.preview(&frame, Instant::now());
            display.show(&rendered)?;

            match display.poll_key()? {
                Some(Key::Quit) => {
                    log::info!("Quit requested");
                    return Ok(());
                }
                Some(Key::Capture) => match self.capture(&frame, Instant::now(), display, operator) {
                    Ok(CaptureOutcome::CoolingDown) => log::debug!("Capture ignored: cooling down"),
                    Ok(CaptureOutcome::NoTarget) => log::warn!("No face in view to capture"),
                    Ok(_) => {}
                    Err(EnrollError::Display(e)) => return Err(e.into()),
                    Err(e) => log::warn!("Enrollment failed: {}", e),
                },
                Some(Key::ToggleLowLight) | None => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::testing::ScriptedDetector;
    use crate::analyze::FaceDetection;
    use crate::capture::testing::ScriptedSource;
    use crate::display::testing::ScriptedDisplay;
    use crate::speech::testing::RecordingSpeaker;
    use ndarray::arr1;
    use std::collections::VecDeque;
    use std::fs;
    use std::time::Duration;

    struct ScriptedOperator {
        names: VecDeque<Option<String>>,
        overwrite: bool,
        confirmations: usize,
    }

    impl ScriptedOperator {
        fn answering(names: &[Option<&str>], overwrite: bool) -> Self {
            Self {
                names: names.iter().map(|n| n.map(str::to_string)).collect(),
                overwrite,
                confirmations: 0,
            }
        }
    }

    impl Operator for ScriptedOperator {
        fn ask_name(&mut self) -> Option<String> {
            self.names.pop_front().flatten()
        }

        fn confirm_overwrite(&mut self, _name: &str) -> bool {
            self.confirmations += 1;
            self.overwrite
        }
    }

    fn face_at(x: f32, size: f32, embedding: Option<&[f32]>) -> FaceDetection {
        FaceDetection::new(
            BoundingBox::new(x, 40.0, x + size, 40.0 + size),
            embedding.map(arr1),
        )
    }

    fn write_image(dir: &Path) -> PathBuf {
        let path = dir.join("person.png");
        RgbImage::new(200, 200).save(&path).unwrap();
        path
    }

    fn config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.camera.retry_delay_ms = 0;
        config.enrollment.preview_interval_secs = 0.0;
        config.debug.output_dir = dir.join("debug");
        config
    }

    #[test]
    fn test_parse_name() {
        assert_eq!(parse_name(Some("  Alice \n".to_string())), Some("Alice".to_string()));
        assert_eq!(parse_name(Some("CANCEL".to_string())), None);
        assert_eq!(parse_name(Some("   ".to_string())), None);
        assert_eq!(parse_name(None), None);
    }

    #[test]
    fn test_image_enrollment_uses_largest_face() {
        let dir = tempfile::tempdir().unwrap();
        let store = FaceStore::new(dir.path().join("faces.json"));
        let mut detector = ScriptedDetector::always(vec![
            face_at(90.0, 20.0, Some(&[0.0, 1.0])),
            face_at(0.0, 60.0, Some(&[1.0, 0.0])),
        ]);
        let speaker = RecordingSpeaker::default();
        let mut operator = ScriptedOperator::answering(&[], false);

        let faces = enroll_from_image(
            &mut detector,
            &store,
            &write_image(dir.path()),
            " Alice ",
            &mut operator,
            &speaker,
        )
        .unwrap();

        assert_eq!(store::names(&faces), vec!["Alice"]);
        assert_eq!(faces[0].embedding, arr1(&[1.0, 0.0]));
        assert_eq!(store.load(), faces);
        assert_eq!(speaker.spoken(), vec!["Alice has been enrolled from image.".to_string()]);
    }

    #[test]
    fn test_image_enrollment_failures() {
        let dir = tempfile::tempdir().unwrap();
        let store = FaceStore::new(dir.path().join("faces.json"));
        let image = write_image(dir.path());
        let speaker = RecordingSpeaker::default();
        let mut operator = ScriptedOperator::answering(&[], true);

        let mut detector = ScriptedDetector::always(vec![face_at(0.0, 60.0, Some(&[1.0, 0.0]))]);
        let result = enroll_from_image(&mut detector, &store, &image, "  ", &mut operator, &speaker);
        assert!(matches!(result, Err(EnrollError::EmptyName)));
        assert_eq!(detector.calls, 0);

        let missing = dir.path().join("nope.png");
        let result = enroll_from_image(&mut detector, &store, &missing, "Bob", &mut operator, &speaker);
        assert!(matches!(result, Err(EnrollError::ImageNotFound(_))));

        let garbage = dir.path().join("garbage.png");
        fs::write(&garbage, b"not an image").unwrap();
        let result = enroll_from_image(&mut detector, &store, &garbage, "Bob", &mut operator, &speaker);
        assert!(matches!(result, Err(EnrollError::ImageRead { .. })));

        let mut empty = ScriptedDetector::always(vec![]);
        let result = enroll_from_image(&mut empty, &store, &image, "Bob", &mut operator, &speaker);
        assert!(matches!(result, Err(EnrollError::NoFace)));

        let mut blurry = ScriptedDetector::always(vec![face_at(0.0, 60.0, None)]);
        let result = enroll_from_image(&mut blurry, &store, &image, "Bob", &mut operator, &speaker);
        assert!(matches!(result, Err(EnrollError::NoEmbedding)));

        assert!(!store.path().exists());
        assert!(speaker.spoken().is_empty());
    }

    #[test]
    fn test_declined_overwrite_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = FaceStore::new(dir.path().join("faces.json"));
        store
            .save(&[EnrolledFace {
                name: "Alice".to_string(),
                embedding: arr1(&[0.0, 1.0]),
            }])
            .unwrap();
        let before = fs::read(store.path()).unwrap();

        let mut detector = ScriptedDetector::always(vec![face_at(0.0, 60.0, Some(&[1.0, 0.0]))]);
        let speaker = RecordingSpeaker::default();
        let mut operator = ScriptedOperator::answering(&[], false);

        let result = enroll_from_image(
            &mut detector,
            &store,
            &write_image(dir.path()),
            "Alice",
            &mut operator,
            &speaker,
        );

        assert!(matches!(result, Err(EnrollError::OverwriteDeclined(_))));
        assert_eq!(operator.confirmations, 1);
        assert_eq!(fs::read(store.path()).unwrap(), before);
        assert!(speaker.spoken().is_empty());
    }

    #[test]
    fn test_accepted_overwrite_replaces_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = FaceStore::new(dir.path().join("faces.json"));
        store
            .save(&[EnrolledFace {
                name: "Alice".to_string(),
                embedding: arr1(&[0.0, 1.0]),
            }])
            .unwrap();

        let mut detector = ScriptedDetector::always(vec![face_at(0.0, 60.0, Some(&[1.0, 0.0]))]);
        let speaker = RecordingSpeaker::default();
        let mut operator = ScriptedOperator::answering(&[], true);

        let faces = enroll_from_image(
            &mut detector,
            &store,
            &write_image(dir.path()),
            "Alice",
            &mut operator,
            &speaker,
        )
        .unwrap();

        assert_eq!(faces.len(), 1);
        assert_eq!(store.load()[0].embedding, arr1(&[1.0, 0.0]));
    }

    #[test]
    fn test_preview_box_color_reflects_size() {
        let dir = tempfile::tempdir().unwrap();
        let detector = ScriptedDetector::new(vec![
            vec![face_at(40.0, 80.0, None)],
            vec![face_at(40.0, 30.0, None)],
        ]);
        let mut live = LiveEnrollment::new(
            config(dir.path()),
            detector,
            FaceStore::new(dir.path().join("faces.json")),
            RecordingSpeaker::default(),
        );
        let frame = RgbImage::new(200, 200);
        let t = Instant::now();

        let big = live.preview(&frame, t);
        assert_eq!(big.get_pixel(40, 40), &imaging::GREEN);

        let small = live.preview(&frame, t + Duration::from_millis(1));
        assert_eq!(small.get_pixel(40, 40), &imaging::RED);
    }

    #[test]
    fn test_capture_cooldown_and_target() {
        let dir = tempfile::tempdir().unwrap();
        let detector = ScriptedDetector::new(vec![
            vec![],
            vec![face_at(60.0, 80.0, Some(&[1.0, 0.0]))],
        ]);
        let mut live = LiveEnrollment::new(
            config(dir.path()),
            detector,
            FaceStore::new(dir.path().join("faces.json")),
            RecordingSpeaker::default(),
        );
        let mut display = ScriptedDisplay::default();
        let mut operator = ScriptedOperator::answering(&[Some("Alice")], false);
        let frame = RgbImage::new(200, 200);
        let t = Instant::now();

        live.preview(&frame, t);
        let outcome = live.capture(&frame, t, &mut display, &mut operator).unwrap();
        assert_eq!(outcome, CaptureOutcome::NoTarget);

        let later = t + Duration::from_millis(500);
        live.preview(&frame, later);
        let outcome = live.capture(&frame, later, &mut display, &mut operator).unwrap();
        assert_eq!(outcome, CaptureOutcome::CoolingDown);

        let ready = t + Duration::from_millis(2100);
        let outcome = live.capture(&frame, ready, &mut display, &mut operator).unwrap();
        assert_eq!(outcome, CaptureOutcome::Enrolled("Alice".to_string()));
        assert_eq!(display.suspended, 1);
        assert_eq!(store::names(live.faces()), vec!["Alice"]);
        assert_eq!(live.speaker.spoken(), vec!["Alice has been enrolled.".to_string()]);
    }

    #[test]
    fn test_capture_without_embedding_saves_debug_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut live = LiveEnrollment::new(
            config(dir.path()),
            ScriptedDetector::always(vec![face_at(60.0, 80.0, None)]),
            FaceStore::new(dir.path().join("faces.json")),
            RecordingSpeaker::default(),
        );
        let mut display = ScriptedDisplay::default();
        let mut operator = ScriptedOperator::answering(&[Some("Alice")], false);
        let frame = RgbImage::new(200, 200);
        let t = Instant::now();

        live.preview(&frame, t);
        let result = live.capture(&frame, t, &mut display, &mut operator);

        assert!(matches!(result, Err(EnrollError::NoEmbedding)));
        assert_eq!(display.suspended, 0);
        assert_eq!(fs::read_dir(dir.path().join("debug")).unwrap().count(), 1);
    }

    #[test]
    fn test_capture_cancel_and_end_of_input() {
        let dir = tempfile::tempdir().unwrap();
        let store_path = dir.path().join("faces.json");
        let mut live = LiveEnrollment::new(
            config(dir.path()),
            ScriptedDetector::always(vec![face_at(60.0, 80.0, Some(&[1.0, 0.0]))]),
            FaceStore::new(&store_path),
            RecordingSpeaker::default(),
        );
        let mut display = ScriptedDisplay::default();
        let mut operator = ScriptedOperator::answering(&[Some("cancel"), None], false);
        let frame = RgbImage::new(200, 200);
        let t = Instant::now();

        live.preview(&frame, t);
        let first = live.capture(&frame, t, &mut display, &mut operator).unwrap();
        let second = live
            .capture(&frame, t + Duration::from_secs(3), &mut display, &mut operator)
            .unwrap();

        assert_eq!(first, CaptureOutcome::Cancelled);
        assert_eq!(second, CaptureOutcome::Cancelled);
        assert!(live.faces().is_empty());
        assert!(!store_path.exists());
    }

    #[test]
    fn test_save_failure_keeps_previous_faces() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, b"").unwrap();

        let mut live = LiveEnrollment::new(
            config(dir.path()),
            ScriptedDetector::always(vec![face_at(60.0, 80.0, Some(&[1.0, 0.0]))]),
            FaceStore::new(blocker.join("faces.json")),
            RecordingSpeaker::default(),
        );
        let mut display = ScriptedDisplay::default();
        let mut operator = ScriptedOperator::answering(&[Some("Alice")], false);
        let frame = RgbImage::new(200, 200);
        let t = Instant::now();

        live.preview(&frame, t);
        let result = live.capture(&frame, t, &mut display, &mut operator);

        assert!(matches!(result, Err(EnrollError::Storage(_))));
        assert!(live.faces().is_empty());
        assert!(live.speaker.spoken().is_empty());
    }

    #[test]
    fn test_run_captures_and_quits() {
        let dir = tempfile::tempdir().unwrap();
        let store = FaceStore::new(dir.path().join("faces.json"));
        let mut live = LiveEnrollment::new(
            config(dir.path()),
            ScriptedDetector::always(vec![face_at(60.0, 80.0, Some(&[1.0, 0.0]))]),
            FaceStore::new(store.path()),
            RecordingSpeaker::default(),
        );
        let mut source = ScriptedSource::frames(3, 200, 200);
        let mut display = ScriptedDisplay::new(vec![None, Some(Key::Capture), Some(Key::Quit)]);
        let mut operator = ScriptedOperator::answering(&[Some("Alice")], false);

        live.run(&mut source, &mut display, &mut operator).unwrap();

        assert_eq!(display.shown.len(), 3);
        assert_eq!(store::names(&store.load()), vec!["Alice"]);
    }
}
