//! Frame-level image operations: low-light enhancement, zoom crops, overlays
//! and debug snapshots.

use crate::detect::BoundingBox;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};

pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const RED: Rgb<u8> = Rgb([255, 0, 0]);

/// Linear brightness/contrast boost: `clamp(alpha * p + beta)` per channel
pub fn enhance_contrast(frame: &RgbImage, alpha: f32, beta: f32) -> RgbImage {
    let mut out = frame.clone();
    for pixel in out.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            *channel = (alpha * *channel as f32 + beta).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Integer crop rectangle around `bbox`, grown by `padding` times the box size
/// on every side and clamped to the frame. `None` if nothing is left.
pub fn crop_rect(bbox: &BoundingBox, padding: f32, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    if bbox.is_degenerate() {
        return None;
    }

    let pad_x = bbox.width() * padding;
    let pad_y = bbox.height() * padding;

    let x1 = (bbox.x1 - pad_x).floor().clamp(0.0, width as f32) as u32;
    let y1 = (bbox.y1 - pad_y).floor().clamp(0.0, height as f32) as u32;
    let x2 = (bbox.x2 + pad_x).ceil().clamp(0.0, width as f32) as u32;
    let y2 = (bbox.y2 + pad_y).ceil().clamp(0.0, height as f32) as u32;

    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some((x1, y1, x2 - x1, y2 - y1))
}

/// Padded crop of `bbox` scaled back up to the full frame size
pub fn zoom_region(frame: &RgbImage, bbox: &BoundingBox, padding: f32) -> Option<RgbImage> {
    let (x, y, w, h) = crop_rect(bbox, padding, frame.width(), frame.height())?;
    let crop = imageops::crop_imm(frame, x, y, w, h).to_image();
    Some(imageops::resize(&crop, frame.width(), frame.height(), FilterType::Triangle))
}

/// Outline `bbox` on `frame`, clipped to the frame
pub fn draw_box(frame: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    let Some((x, y, w, h)) = crop_rect(bbox, 0.0, frame.width(), frame.height()) else {
        return;
    };
    let rect = Rect::at(x as i32, y as i32).of_size(w, h);
    draw_hollow_rect_mut(frame, rect, color);
    // Second pass one pixel in so the box stays visible after preview scaling
    if w > 2 && h > 2 {
        let inner = Rect::at(x as i32 + 1, y as i32 + 1).of_size(w - 2, h - 2);
        draw_hollow_rect_mut(frame, inner, color);
    }
}

/// Expand a leading `~` to `$HOME`
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

/// Ensure debug output directory exists, creating it if necessary
pub fn ensure_debug_dir(debug_dir: &Path) -> std::io::Result<PathBuf> {
    let expanded = expand_home(debug_dir);
    std::fs::create_dir_all(&expanded)?;
    Ok(expanded)
}

/// Generate a debug screenshot filename with timestamp
pub fn debug_filename(operation: &str) -> String {
    use chrono::Local;
    let timestamp = Local::now().format("%Y%m%d_%H%M%S%.3f");
    format!("{}_{}_{}.jpg", operation, timestamp, std::process::id())
}

/// Save `frame` under `debug_dir`, returning the written path
pub fn save_debug_frame(
    frame: &RgbImage,
    debug_dir: &Path,
    operation: &str,
) -> Result<PathBuf, image::ImageError> {
    let dir = ensure_debug_dir(debug_dir)?;
    let path = dir.join(debug_filename(operation));
    frame.save(&path)?;
    log::info!("Debug frame saved: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enhance_contrast_clamps() {
        let frame = RgbImage::from_pixel(2, 2, Rgb([100, 0, 250]));
        let out = enhance_contrast(&frame, 1.2, 5.0);
        assert_eq!(out.get_pixel(0, 0), &Rgb([125, 5, 255]));
        // Source untouched
        assert_eq!(frame.get_pixel(0, 0), &Rgb([100, 0, 250]));
    }

    #[test]
    fn test_crop_rect_pads_and_clamps() {
        let bbox = BoundingBox::new(10.0, 10.0, 30.0, 50.0);
        // 20x40 box with 0.5 padding: 10 px horizontally, 20 px vertically
        assert_eq!(crop_rect(&bbox, 0.5, 100, 100), Some((0, 0, 40, 70)));

        let edge = BoundingBox::new(80.0, 80.0, 120.0, 120.0);
        assert_eq!(crop_rect(&edge, 0.0, 100, 100), Some((80, 80, 20, 20)));
    }

    #[test]
    fn test_crop_rect_rejects_degenerate() {
        assert_eq!(crop_rect(&BoundingBox::new(10.0, 10.0, 10.0, 40.0), 0.3, 100, 100), None);
        assert_eq!(crop_rect(&BoundingBox::new(150.0, 150.0, 200.0, 200.0), 0.0, 100, 100), None);
    }

    #[test]
    fn test_zoom_region_keeps_frame_size() {
        let mut frame = RgbImage::new(64, 48);
        for (x, y, pixel) in frame.enumerate_pixels_mut() {
            if (20..40).contains(&x) && (10..30).contains(&y) {
                *pixel = Rgb([200, 200, 200]);
            }
        }

        let zoomed = zoom_region(&frame, &BoundingBox::new(20.0, 10.0, 40.0, 30.0), 0.0).unwrap();
        assert_eq!(zoomed.dimensions(), (64, 48));
        assert_eq!(zoomed.get_pixel(32, 24), &Rgb([200, 200, 200]));

        assert!(zoom_region(&frame, &BoundingBox::new(5.0, 5.0, 5.0, 5.0), 0.3).is_none());
    }

    #[test]
    fn test_draw_box_outline() {
        let mut frame = RgbImage::new(50, 50);
        draw_box(&mut frame, &BoundingBox::new(10.0, 10.0, 30.0, 30.0), GREEN);
        assert_eq!(frame.get_pixel(10, 10), &GREEN);
        assert_eq!(frame.get_pixel(20, 20), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_save_debug_frame() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("debug");
        let path = save_debug_frame(&RgbImage::new(8, 8), &out, "enroll_no_embedding").unwrap();
        assert!(path.exists());
        assert!(path.starts_with(&out));
    }

    #[test]
    fn test_expand_home_leaves_plain_paths() {
        assert_eq!(expand_home(Path::new("/tmp/x")), PathBuf::from("/tmp/x"));
    }
}
