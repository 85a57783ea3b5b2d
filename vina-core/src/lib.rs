pub mod align;
pub mod analyze;
pub mod capture;
pub mod compare;
pub mod config;
pub mod detect;
pub mod display;
pub mod embed;
pub mod enroll;
pub mod greeter;
pub mod imaging;
pub mod recognize;
pub mod runtime;
pub mod select;
pub mod session;
pub mod speech;
pub mod store;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Runtime error: {0}")]
    Runtime(#[from] runtime::RuntimeError),
    #[error("Camera error: {0}")]
    Capture(#[from] capture::CaptureError),
    #[error("Detection error: {0}")]
    Detection(#[from] detect::DetectionError),
    #[error("Alignment error: {0}")]
    Alignment(#[from] align::AlignmentError),
    #[error("Embedding error: {0}")]
    Embedding(#[from] embed::EmbedError),
    #[error("Storage error: {0}")]
    Storage(#[from] store::StorageError),
    #[error("Display error: {0}")]
    Display(#[from] display::DisplayError),
    #[error("Enrollment failed: {0}")]
    Enroll(#[from] enroll::EnrollError),
}
