use crate::embed::{normalize_embedding, Embedding};
use ndarray::Array1;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Name cannot be empty")]
    EmptyName,
    #[error("Face not found: {0}")]
    FaceNotFound(String),
}

/// A known person: unique name plus unit-norm embedding
#[derive(Debug, Clone, PartialEq)]
pub struct EnrolledFace {
    pub name: String,
    pub embedding: Embedding,
}

#[derive(Serialize)]
struct StoredFace<'a> {
    name: &'a str,
    embedding: Vec<f32>,
}

/// Flat name -> embedding database persisted as a single JSON file
pub struct FaceStore {
    path: PathBuf,
}

impl FaceStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all enrolled faces. Never fails: a missing or corrupt file yields an
    /// empty list, and malformed records are dropped.
    pub fn load(&self) -> Vec<EnrolledFace> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                log::warn!(
                    "Could not read known faces from {} ({}), starting with an empty database",
                    self.path.display(),
                    e
                );
                return Vec::new();
            }
        };

        let value: Value = match serde_json::from_str(&contents) {
            Ok(value) => value,
            Err(e) => {
                log::warn!(
                    "Known faces database {} is corrupt ({}), starting with an empty database",
                    self.path.display(),
                    e
                );
                return Vec::new();
            }
        };

        let Value::Array(records) = value else {
            log::warn!(
                "Known faces database {} is not a list, starting with an empty database",
                self.path.display()
            );
            return Vec::new();
        };

        let mut faces: Vec<EnrolledFace> = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            match parse_record(record) {
                Ok(face) => {
                    // Later records win so names stay unique
                    faces.retain(|existing| existing.name != face.name);
                    faces.push(face);
                }
                Err(reason) => log::warn!("Skipping database record {}: {}", index, reason),
            }
        }

        log::info!("Loaded {} known faces from {}", faces.len(), self.path.display());
        faces
    }

    /// Atomically replace the database file with `faces`
    pub fn save(&self, faces: &[EnrolledFace]) -> Result<(), StorageError> {
        let records: Vec<StoredFace> = faces
            .iter()
            .map(|face| StoredFace {
                name: &face.name,
                embedding: face.embedding.to_vec(),
            })
            .collect();
        let data = serde_json::to_vec_pretty(&records)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.temp_path();
        let result = Self::write_file(&tmp_path, &data).and_then(|()| fs::rename(&tmp_path, &self.path));
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        log::info!(
            "Known faces database saved to {} with {} entries",
            self.path.display(),
            faces.len()
        );
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "known_faces.json".into());
        name.push(format!(".{}.tmp", std::process::id()));
        self.path.with_file_name(name)
    }

    fn write_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut file = fs::File::create(path)?;

        // Owner read/write only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }

        file.write_all(data)?;
        file.sync_all()
    }
}

fn parse_record(record: &Value) -> Result<EnrolledFace, String> {
    let Value::Object(fields) = record else {
        return Err("not an object".to_string());
    };

    let name = match fields.get("name") {
        Some(Value::String(name)) => name.trim(),
        Some(_) => return Err("name is not a string".to_string()),
        None => return Err("missing name".to_string()),
    };
    if name.is_empty() {
        return Err("empty name".to_string());
    }

    let Some(Value::Array(values)) = fields.get("embedding") else {
        return Err(format!("'{}' has a missing or malformed embedding", name));
    };
    let embedding = values
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect::<Option<Vec<f32>>>()
        .ok_or_else(|| format!("'{}' has a non-numeric embedding", name))?;

    let embedding = normalize_embedding(Array1::from_vec(embedding))
        .ok_or_else(|| format!("'{}' has an empty or zero embedding", name))?;

    Ok(EnrolledFace {
        name: name.to_string(),
        embedding,
    })
}

/// Replace-or-append `name`. Overwrite confirmation is the caller's job.
pub fn enroll(
    faces: &[EnrolledFace],
    name: &str,
    embedding: Embedding,
) -> Result<Vec<EnrolledFace>, StorageError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StorageError::EmptyName);
    }

    let mut updated: Vec<EnrolledFace> = faces.iter().filter(|f| f.name != name).cloned().collect();
    updated.push(EnrolledFace {
        name: name.to_string(),
        embedding,
    });
    Ok(updated)
}

pub fn contains(faces: &[EnrolledFace], name: &str) -> bool {
    let name = name.trim();
    faces.iter().any(|f| f.name == name)
}

pub fn remove(faces: &[EnrolledFace], name: &str) -> Result<Vec<EnrolledFace>, StorageError> {
    let name = name.trim();
    if !contains(faces, name) {
        return Err(StorageError::FaceNotFound(name.to_string()));
    }
    Ok(faces.iter().filter(|f| f.name != name).cloned().collect())
}

pub fn names(faces: &[EnrolledFace]) -> Vec<&str> {
    faces.iter().map(|f| f.name.as_str()).collect()
}
