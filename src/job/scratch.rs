use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context as _;

use crate::foundation::error::SupercutResult;
use crate::metadata::sanitize_title;

static SEQ: AtomicU64 = AtomicU64::new(0);

/// Job-owned temporary directory, removed with everything in it when dropped.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Create a fresh directory under `root` named after the job.
    pub fn create(root: &Path, job_id: &str) -> SupercutResult<Self> {
        let stem = sanitize_title(job_id)
            .unwrap_or_else(|| "job".to_owned())
            .replace(' ', "_");
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let path = root.join(format!(
            "supercut_{stem}_{}_{nanos}_{}",
            std::process::id(),
            SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&path)
            .with_context(|| format!("create scratch directory '{}'", path.display()))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "scratch directory removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to remove scratch directory"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_dir_is_removed_on_drop() {
        let root = std::env::temp_dir();
        let kept;
        {
            let scratch = ScratchDir::create(&root, "job: one/two").unwrap();
            kept = scratch.path().to_path_buf();
            std::fs::write(scratch.file("title_0.png"), b"x").unwrap();
            assert!(kept.is_dir());
            let name = kept.file_name().unwrap().to_string_lossy().to_string();
            assert!(name.starts_with("supercut_job__one_two_"));
        }
        assert!(!kept.exists());
    }

    #[test]
    fn concurrent_scratch_dirs_do_not_collide() {
        let root = std::env::temp_dir();
        let a = ScratchDir::create(&root, "same").unwrap();
        let b = ScratchDir::create(&root, "same").unwrap();
        assert_ne!(a.path(), b.path());
    }
}
