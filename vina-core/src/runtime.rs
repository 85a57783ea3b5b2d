use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Failed to create session: {0}")]
    SessionCreation(String),
    #[error("No execution backend could load {model}: {reasons}")]
    NoBackend { model: String, reasons: String },
}

/// Execution backends that can run the ONNX models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionBackend {
    #[cfg(feature = "cuda")]
    Cuda,
    Cpu,
}

impl ExecutionBackend {
    /// Candidates in order of preference; the first one that loads wins
    pub fn preferred() -> Vec<ExecutionBackend> {
        let mut backends = Vec::new();
        #[cfg(feature = "cuda")]
        backends.push(ExecutionBackend::Cuda);
        backends.push(ExecutionBackend::Cpu);
        backends
    }

    fn configure(self, builder: SessionBuilder) -> Result<SessionBuilder, RuntimeError> {
        match self {
            #[cfg(feature = "cuda")]
            ExecutionBackend::Cuda => {
                use ort::execution_providers::CUDAExecutionProvider;
                builder
                    .with_execution_providers([CUDAExecutionProvider::default()
                        .build()
                        .error_on_failure()])
                    .map_err(|e| RuntimeError::SessionCreation(e.to_string()))
            }
            ExecutionBackend::Cpu => Ok(builder),
        }
    }
}

impl fmt::Display for ExecutionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(feature = "cuda")]
            ExecutionBackend::Cuda => write!(f, "CUDA"),
            ExecutionBackend::Cpu => write!(f, "CPU"),
        }
    }
}

/// ONNX Runtime wrapper
pub struct OnnxRuntime {
    candidates: Vec<ExecutionBackend>,
}

impl OnnxRuntime {
    /// Create a runtime that tries the preferred backends in order
    pub fn new() -> Self {
        Self::with_backends(ExecutionBackend::preferred())
    }

    pub fn with_backends(candidates: Vec<ExecutionBackend>) -> Self {
        Self { candidates }
    }

    pub fn candidates(&self) -> &[ExecutionBackend] {
        &self.candidates
    }

    /// Create a session from a model file using the first backend that loads it
    pub fn create_session<P: AsRef<Path>>(&self, model_path: P) -> Result<Session, RuntimeError> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(RuntimeError::SessionCreation(format!(
                "Model file not found: {:?}",
                model_path
            )));
        }

        let mut reasons = Vec::new();
        for &backend in &self.candidates {
            match Self::create_with_backend(backend, model_path) {
                Ok(session) => {
                    log::info!("Loaded ONNX model {:?} on {} backend", model_path, backend);
                    return Ok(session);
                }
                Err(e) => {
                    log::warn!("{} backend unavailable for {:?}: {}", backend, model_path, e);
                    reasons.push(format!("{}: {}", backend, e));
                }
            }
        }

        Err(RuntimeError::NoBackend {
            model: model_path.display().to_string(),
            reasons: reasons.join("; "),
        })
    }

    fn create_with_backend(
        backend: ExecutionBackend,
        model_path: &Path,
    ) -> Result<Session, RuntimeError> {
        let builder = Session::builder()
            .map_err(|e| RuntimeError::SessionCreation(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| RuntimeError::SessionCreation(e.to_string()))?;

        backend
            .configure(builder)?
            .commit_from_file(model_path)
            .map_err(|e| RuntimeError::SessionCreation(e.to_string()))
    }
}

impl Default for OnnxRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_is_last_resort() {
        let runtime = OnnxRuntime::new();
        assert_eq!(runtime.candidates().last(), Some(&ExecutionBackend::Cpu));
    }

    #[test]
    fn test_missing_model_is_an_error() {
        let runtime = OnnxRuntime::new();
        let result = runtime.create_session("/nonexistent/model.onnx");
        assert!(matches!(result, Err(RuntimeError::SessionCreation(_))));
    }
}
