use crate::align::ALIGNED_SIZE;
use crate::runtime::OnnxRuntime;
use image::RgbImage;
use ndarray::Array1;
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Invalid embedding dimension, expected 512 but got {0}")]
    InvalidDimension(usize),
    #[error("Embedding has zero norm")]
    ZeroNorm,
}

/// Expected embedding dimension for ArcFace
pub const EMBEDDING_DIM: usize = 512;

/// L2-normalized identity vector; dot product equals cosine similarity
pub type Embedding = Array1<f32>;

/// ArcFace embedder
pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    pub fn new<P: AsRef<Path>>(model_path: P, runtime: &OnnxRuntime) -> Result<Self, EmbedError> {
        let session = runtime
            .create_session(model_path)
            .map_err(|e| EmbedError::ModelLoad(e.to_string()))?;

        Ok(Self { session })
    }

    /// Generate an embedding for a 112x112 aligned face
    pub fn embed(&mut self, aligned_face: &RgbImage) -> Result<Embedding, EmbedError> {
        let (width, height) = aligned_face.dimensions();
        if width != ALIGNED_SIZE || height != ALIGNED_SIZE {
            return Err(EmbedError::Inference(format!(
                "Input image must be {}x{}, got {}x{}",
                ALIGNED_SIZE, ALIGNED_SIZE, width, height
            )));
        }

        let input_value = Value::from_array(Self::preprocess(aligned_face))
            .map_err(|e| EmbedError::Inference(format!("Failed to create input tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(|e| EmbedError::Inference(e.to_string()))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedError::Inference(format!("Failed to extract embedding: {}", e)))?;

        if shape.len() != 2 || shape[1] as usize != EMBEDDING_DIM || data.len() < EMBEDDING_DIM {
            return Err(EmbedError::InvalidDimension(
                shape.get(1).copied().unwrap_or(0) as usize,
            ));
        }

        normalize_embedding(Array1::from_iter(data[..EMBEDDING_DIM].iter().copied()))
            .ok_or(EmbedError::ZeroNorm)
    }

    /// NCHW tensor, (pixel - 127.5) / 127.5, RGB order
    fn preprocess(image: &RgbImage) -> ([usize; 4], Vec<f32>) {
        let size = ALIGNED_SIZE as usize;
        let mut input_data = vec![0.0f32; 3 * size * size];

        for (x, y, pixel) in image.enumerate_pixels() {
            let offset = y as usize * size + x as usize;
            for c in 0..3 {
                input_data[c * size * size + offset] = (pixel[c] as f32 - 127.5) / 127.5;
            }
        }

        ([1, 3, size, size], input_data)
    }
}

/// L2 normalize an embedding vector; `None` for a zero or non-finite vector
pub fn normalize_embedding(mut embedding: Embedding) -> Option<Embedding> {
    let norm = embedding.dot(&embedding).sqrt();
    if norm > 0.0 && norm.is_finite() {
        embedding /= norm;
        Some(embedding)
    } else {
        None
    }
}
