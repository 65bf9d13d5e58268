//! On-disk layout of execution artifacts.
//!
//! Each execution persists a Markdown report `<cell_id>.md` and zero or more
//! images `<cell_id>_<NN>.png` in its artifact directory. Cell ids are
//! recovered from file names alone, so cache maintenance never reads file
//! contents.
//!
//! All writes are atomic: data is written to a temp file in the artifact
//! directory and renamed into place, so the editor never sees partial files.

use std::path::PathBuf;

use base64::prelude::*;

use crate::error::ArtifactError;

const REPORT_EXTENSION: &str = ".md";
const IMAGE_EXTENSION: &str = ".png";

/// File name of the report for `cell_id`.
pub fn report_file_name(cell_id: &str) -> String {
    format!("{}{}", cell_id, REPORT_EXTENSION)
}

/// File name of the `index`-th image of `cell_id` (zero-padded to two digits).
pub fn image_file_name(cell_id: &str, index: usize) -> String {
    format!("{}_{:02}{}", cell_id, index, IMAGE_EXTENSION)
}

/// Recover the owning cell id from an artifact file name.
///
/// Reports yield their stem. Images are split at the last underscore and the
/// suffix must be all digits. Anything else is not an artifact.
pub fn cell_id_from_file_name(name: &str) -> Option<&str> {
    if let Some(stem) = name.strip_suffix(REPORT_EXTENSION) {
        return (!stem.is_empty()).then_some(stem);
    }
    let stem = name.strip_suffix(IMAGE_EXTENSION)?;
    let (cell_id, index) = stem.rsplit_once('_')?;
    if cell_id.is_empty() || index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(cell_id)
}

/// Writes artifacts for executions into one directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Absolute path of `name` inside the artifact directory.
    pub fn path_of(&self, name: &str) -> PathBuf {
        let path = self.dir.join(name);
        std::path::absolute(&path).unwrap_or(path)
    }

    /// Create the artifact directory if needed.
    pub async fn ensure_dir(&self) -> Result<(), ArtifactError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| ArtifactError::CreateDir {
                path: self.dir.clone(),
                source,
            })
    }

    /// Write the Markdown report for `cell_id`, returning its absolute path.
    pub async fn write_report(&self, cell_id: &str, markdown: &str) -> Result<PathBuf, ArtifactError> {
        self.write_atomic(&report_file_name(cell_id), markdown.as_bytes())
            .await
    }

    /// Decode a base64 PNG and write it as the `index`-th image of `cell_id`.
    pub async fn write_image(
        &self,
        cell_id: &str,
        index: usize,
        png_base64: &str,
    ) -> Result<PathBuf, ArtifactError> {
        // Kernels may wrap base64 payloads across lines.
        let compact: String = png_base64.split_whitespace().collect();
        let bytes = BASE64_STANDARD.decode(compact.as_bytes())?;
        self.write_atomic(&image_file_name(cell_id, index), &bytes)
            .await
    }

    async fn write_atomic(&self, name: &str, data: &[u8]) -> Result<PathBuf, ArtifactError> {
        let target = self.path_of(name);
        let tmp = self.dir.join(format!(".tmp.{}", uuid::Uuid::new_v4()));
        if let Err(source) = async {
            tokio::fs::write(&tmp, data).await?;
            tokio::fs::rename(&tmp, &target).await
        }
        .await
        {
            tokio::fs::remove_file(&tmp).await.ok();
            return Err(ArtifactError::Write {
                path: target,
                source,
            });
        }
        Ok(target)
    }
}
