//! Image store: persists received image sets under the animations root.
//!
//! Files arrive named like `wave3.png`; the trailing frame number is
//! stripped to derive the animation directory, so a whole sequence lands in
//! `<root>/wave/`. The rendering pool scans these directories once at
//! startup; a store performed later does not grow the pool.

use std::path::{Path, PathBuf};

/// Fallback directory for names that strip down to nothing.
const UNKNOWN_ANIMATION: &str = "unknown";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The file name would escape the animations root.
    #[error("invalid image name: {0:?}")]
    InvalidName(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Filesystem store for animation image sets.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Animation name for an image file name: extension dropped, trailing
    /// frame digits stripped (`wave3.png` → `wave`).
    pub fn animation_for(name: &str) -> &str {
        let stem = Path::new(name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(name);
        let trimmed = stem.trim_end_matches(|c: char| c.is_ascii_digit());
        if trimmed.is_empty() {
            UNKNOWN_ANIMATION
        } else {
            trimmed
        }
    }

    /// Write one image into its animation directory, replacing any existing
    /// file of the same name. Returns the animation directory.
    ///
    /// The payload lands under a temporary name and is renamed into place,
    /// so a concurrent reader never observes a truncated file. Repeated
    /// stores of the same name are safe.
    pub async fn store(&self, name: &str, payload: &[u8]) -> Result<PathBuf, StoreError> {
        // The link is not trusted to build paths.
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name == "."
            || name == ".."
        {
            return Err(StoreError::InvalidName(name.to_string()));
        }

        let dir = self.root.join(Self::animation_for(name));
        tokio::fs::create_dir_all(&dir).await?;

        let final_path = dir.join(name);
        let tmp_path = dir.join(format!(".{name}.tmp"));
        tokio::fs::write(&tmp_path, payload).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;

        tracing::debug!(
            file = %final_path.display(),
            bytes = payload.len(),
            "image stored"
        );
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn animation_name_strips_frame_digits() {
        assert_eq!(ImageStore::animation_for("wave3.png"), "wave");
        assert_eq!(ImageStore::animation_for("wave12.png"), "wave");
        assert_eq!(ImageStore::animation_for("Speaking.png"), "Speaking");
        assert_eq!(ImageStore::animation_for("slice0"), "slice");
    }

    #[test]
    fn all_digit_names_fall_back_to_unknown() {
        assert_eq!(ImageStore::animation_for("123.png"), "unknown");
        assert_eq!(ImageStore::animation_for("42"), "unknown");
    }

    #[tokio::test]
    async fn store_creates_directory_and_exact_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ImageStore::new(tmp.path().join("images"));

        let data = vec![0x89, b'P', b'N', b'G', 0x00, 0x01, 0x02];
        let dir = store.store("wave3.png", &data).await.unwrap();

        assert_eq!(dir, tmp.path().join("images").join("wave"));
        let written = tokio::fs::read(dir.join("wave3.png")).await.unwrap();
        assert_eq!(written, data);
    }

    #[tokio::test]
    async fn store_replaces_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ImageStore::new(tmp.path());

        store.store("wave1.png", b"old-contents").await.unwrap();
        let dir = store.store("wave1.png", b"new").await.unwrap();

        let written = tokio::fs::read(dir.join("wave1.png")).await.unwrap();
        assert_eq!(written, b"new");
    }

    #[tokio::test]
    async fn store_is_idempotent_over_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ImageStore::new(tmp.path());

        store.store("wave1.png", b"a").await.unwrap();
        store.store("wave2.png", b"b").await.unwrap();

        let dir = tmp.path().join("wave");
        assert!(dir.join("wave1.png").exists());
        assert!(dir.join("wave2.png").exists());
    }

    #[tokio::test]
    async fn store_rejects_path_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ImageStore::new(tmp.path());

        for name in ["../evil.png", "a/b.png", "..", ""] {
            let err = store.store(name, b"x").await;
            assert!(matches!(err, Err(StoreError::InvalidName(_))), "{name:?}");
        }
    }

    #[tokio::test]
    async fn no_temporary_file_left_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ImageStore::new(tmp.path());

        let dir = store.store("wave1.png", b"data").await.unwrap();
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["wave1.png".to_string()]);
    }
}
