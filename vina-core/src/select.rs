//! Picking the one face worth acting on when a frame holds several.

use crate::analyze::FaceDetection;

/// Face whose box center is nearest the frame center (first wins on ties).
/// Used for live frames, where the person facing the camera is the subject.
pub fn center_most(
    detections: &[FaceDetection],
    frame_width: u32,
    frame_height: u32,
) -> Option<&FaceDetection> {
    let (fx, fy) = (frame_width as f32 / 2.0, frame_height as f32 / 2.0);

    let mut best: Option<(&FaceDetection, f32)> = None;
    for detection in detections {
        let (cx, cy) = detection.bbox.center();
        let dist_sq = (cx - fx).powi(2) + (cy - fy).powi(2);
        if best.map_or(true, |(_, min)| dist_sq < min) {
            best = Some((detection, dist_sq));
        }
    }
    best.map(|(detection, _)| detection)
}

/// Face with the largest box area (first wins on ties).
/// Used for still images, where the dominant subject is framed on purpose.
pub fn largest(detections: &[FaceDetection]) -> Option<&FaceDetection> {
    let mut best: Option<(&FaceDetection, f32)> = None;
    for detection in detections {
        let area = detection.bbox.area();
        if best.map_or(true, |(_, max)| area > max) {
            best = Some((detection, area));
        }
    }
    best.map(|(detection, _)| detection)
}
