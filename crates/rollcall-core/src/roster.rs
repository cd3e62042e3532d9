//! Roster loading from a per-class directory of reference photos.
//!
//! Layout: `<faces_dir>/<class_id>/<student_id>.{jpg,jpeg,png}`. Photos that
//! cannot be decoded or contain no usable face are skipped with a warning; a
//! class may legitimately have a few unusable reference photos.

use crate::encoder::{FaceEncoder, ReferenceImage};
use crate::types::{Roster, Student};
use std::path::{Path, PathBuf};
use thiserror::Error;

const REFERENCE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("no roster for class '{class_id}' (expected directory {path})")]
    NotFound { class_id: String, path: PathBuf },
    #[error("failed to read roster directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Counts of reference photos that did not make it into the roster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub undecodable: usize,
    pub no_face: usize,
    pub encode_failed: usize,
    pub duplicate: usize,
}

impl LoadReport {
    pub fn skipped(&self) -> usize {
        self.undecodable + self.no_face + self.encode_failed + self.duplicate
    }
}

pub struct RosterLoader<E> {
    faces_dir: PathBuf,
    encoder: E,
}

impl<E: FaceEncoder> RosterLoader<E> {
    pub fn new(faces_dir: impl Into<PathBuf>, encoder: E) -> Self {
        Self {
            faces_dir: faces_dir.into(),
            encoder,
        }
    }

    pub fn class_dir(&self, class_id: &str) -> PathBuf {
        self.faces_dir.join(class_id)
    }

    /// Load the roster for `class_id`.
    pub fn load(&mut self, class_id: &str) -> Result<Roster, RosterError> {
        self.load_with_report(class_id).map(|(roster, _)| roster)
    }

    /// Load the roster and report what was skipped.
    pub fn load_with_report(&mut self, class_id: &str) -> Result<(Roster, LoadReport), RosterError> {
        let dir = self.class_dir(class_id);
        if !dir.is_dir() {
            return Err(RosterError::NotFound {
                class_id: class_id.to_string(),
                path: dir,
            });
        }

        let mut paths = reference_images(&dir)?;
        // Directory order is platform-dependent; the gallery order must not be.
        paths.sort();

        let mut roster = Roster::new(class_id);
        let mut report = LoadReport::default();

        for path in paths {
            let Some(student_id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
            else {
                continue;
            };

            let pixels = match image::open(&path) {
                Ok(img) => img.to_luma8(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping undecodable reference image");
                    report.undecodable += 1;
                    continue;
                }
            };

            let reference = ReferenceImage { path, pixels };
            let descriptor = match self.encoder.encode(&reference) {
                Ok(Some(d)) => d,
                Ok(None) => {
                    tracing::warn!(path = %reference.path.display(), "no face found in reference image");
                    report.no_face += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(path = %reference.path.display(), error = %e, "failed to encode reference image");
                    report.encode_failed += 1;
                    continue;
                }
            };

            if !roster.insert(Student { id: student_id.clone(), descriptor }) {
                tracing::warn!(
                    student = %student_id,
                    path = %reference.path.display(),
                    "duplicate student id; keeping the first reference image"
                );
                report.duplicate += 1;
                continue;
            }
            report.loaded += 1;
        }

        tracing::info!(
            class = class_id,
            loaded = report.loaded,
            skipped = report.skipped(),
            "roster loaded"
        );
        if roster.is_empty() {
            tracing::warn!(class = class_id, "roster is empty; every face will be unknown");
        }

        Ok((roster, report))
    }
}

fn reference_images(dir: &Path) -> Result<Vec<PathBuf>, RosterError> {
    let io_err = |source: std::io::Error| RosterError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && has_reference_extension(&path) {
            paths.push(path);
        }
    }
    Ok(paths)
}

fn has_reference_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| REFERENCE_EXTENSIONS.iter().any(|ext| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}
