use crate::error::PredictionError;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Reduce a client-supplied filename to something safe to use inside the
/// uploads directory: final path component only, restricted character set,
/// no leading dots.
pub fn sanitize_filename(raw: &str) -> String {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// An uploaded image stored on disk for the duration of one request.
///
/// The file is removed when the guard drops, so every exit path of the
/// handler, including error returns, cleans up after itself.
#[derive(Debug)]
pub struct TempUpload {
    path: PathBuf,
}

impl TempUpload {
    pub async fn write(
        uploads_dir: &Path,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<Self, PredictionError> {
        let filename = format!("{}-{}", Uuid::new_v4(), sanitize_filename(original_name));
        let path = uploads_dir.join(filename);

        tokio::fs::write(&path, bytes)
            .await
            .map_err(PredictionError::SaveUpload)?;

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to remove uploaded file"
                );
            }
        }
    }
}
