use crate::detect::FacialLandmarks;
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlignmentError {
    #[error("Failed to compute similarity transform: {0}")]
    Transform(String),
}

/// Output size for aligned face
pub const ALIGNED_SIZE: u32 = 112;

/// ArcFace reference landmark positions in the 112x112 crop
pub const CANONICAL_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// Similarity transform `x' = a*x - b*y + tx`, `y' = b*x + a*y + ty`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    /// Least-squares fit mapping `src` points onto `dst` points
    pub fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let n = src.len() as f32;
        let (mut sx, mut sy, mut su, mut sv) = (0.0, 0.0, 0.0, 0.0);
        let (mut sq, mut dot, mut cross) = (0.0, 0.0, 0.0);

        for (&(x, y), &(u, v)) in src.iter().zip(dst.iter()) {
            sx += x;
            sy += y;
            su += u;
            sv += v;
            sq += x * x + y * y;
            dot += u * x + v * y;
            cross += v * x - u * y;
        }

        let denom = n * sq - sx * sx - sy * sy;
        if denom.abs() < 1e-6 {
            return None;
        }

        let a = (n * dot - su * sx - sv * sy) / denom;
        let b = (n * cross + su * sy - sv * sx) / denom;
        Some(Self {
            a,
            b,
            tx: (su - a * sx + b * sy) / n,
            ty: (sv - b * sx - a * sy) / n,
        })
    }

    fn projection(&self) -> Option<Projection> {
        Projection::from_matrix([
            self.a, -self.b, self.tx, //
            self.b, self.a, self.ty, //
            0.0, 0.0, 1.0,
        ])
    }
}

/// Warp a detected face onto the canonical ArcFace crop
pub fn align_face(image: &RgbImage, landmarks: &FacialLandmarks) -> Result<RgbImage, AlignmentError> {
    let transform = Similarity::estimate(&landmarks.points(), &CANONICAL_LANDMARKS)
        .ok_or_else(|| AlignmentError::Transform("landmarks are collinear".to_string()))?;

    if transform.a * transform.a + transform.b * transform.b < 1e-6 {
        return Err(AlignmentError::Transform("transform is singular".to_string()));
    }

    let projection = transform
        .projection()
        .ok_or_else(|| AlignmentError::Transform("transform is not invertible".to_string()))?;

    let mut aligned = RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
    warp_into(image, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut aligned);
    Ok(aligned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let t = Similarity::estimate(&CANONICAL_LANDMARKS, &CANONICAL_LANDMARKS).unwrap();
        assert!((t.a - 1.0).abs() < 1e-2);
        assert!(t.b.abs() < 1e-2);
        assert!(t.tx.abs() < 0.1);
        assert!(t.ty.abs() < 0.1);
    }

    #[test]
    fn test_scaled_translation() {
        let src = CANONICAL_LANDMARKS.map(|(x, y)| (x * 2.0 + 10.0, y * 2.0 + 20.0));
        let t = Similarity::estimate(&src, &CANONICAL_LANDMARKS).unwrap();

        assert!((t.a - 0.5).abs() < 1e-2);
        assert!(t.b.abs() < 1e-2);
        assert!((t.tx + 5.0).abs() < 0.5);
        assert!((t.ty + 10.0).abs() < 0.5);
    }

    #[test]
    fn test_degenerate_landmarks() {
        let src = [(5.0, 5.0); 5];
        assert!(Similarity::estimate(&src, &CANONICAL_LANDMARKS).is_none());
    }

    #[test]
    fn test_align_output_size() {
        let image = RgbImage::from_pixel(200, 200, Rgb([128, 128, 128]));
        let landmarks = FacialLandmarks {
            left_eye: (76.0, 103.0),
            right_eye: (147.0, 103.0),
            nose: (112.0, 143.0),
            left_mouth: (83.0, 185.0),
            right_mouth: (141.0, 184.0),
        };
        let aligned = align_face(&image, &landmarks).unwrap();
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
    }
}
