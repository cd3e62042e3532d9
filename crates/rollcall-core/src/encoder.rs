//! Face encoding boundary for reference images.

use crate::types::Descriptor;
use image::GrayImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("failed to read descriptor {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed descriptor {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("empty descriptor in {0}")]
    Empty(PathBuf),
}

/// A decoded reference photo of one student.
pub struct ReferenceImage {
    pub path: PathBuf,
    pub pixels: GrayImage,
}

/// Extracts a face descriptor from a reference image.
///
/// `Ok(None)` means no face was found; the loader skips that student.
pub trait FaceEncoder {
    fn encode(&mut self, reference: &ReferenceImage) -> Result<Option<Descriptor>, EncodeError>;
}

/// Reads the descriptor the enrollment pipeline stored beside each reference
/// image (`alice.jpg` -> `alice.json`). A missing sidecar means no face was found.
#[derive(Debug, Clone, Copy, Default)]
pub struct SidecarEncoder;

impl SidecarEncoder {
    pub fn sidecar_path(image_path: &Path) -> PathBuf {
        image_path.with_extension("json")
    }
}

impl FaceEncoder for SidecarEncoder {
    fn encode(&mut self, reference: &ReferenceImage) -> Result<Option<Descriptor>, EncodeError> {
        let path = Self::sidecar_path(&reference.path);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(EncodeError::Io { path, source }),
        };

        let descriptor: Descriptor = serde_json::from_str(&raw)
            .map_err(|source| EncodeError::Malformed { path: path.clone(), source })?;

        if descriptor.is_empty() {
            return Err(EncodeError::Empty(path));
        }
        Ok(Some(descriptor))
    }
}
