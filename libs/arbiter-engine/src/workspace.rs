//! Per-request scratch directories.
//!
//! Each request gets `<root>/arbiter-<uuid>-XXXXXX`, populated with one slot
//! per distinct prepared source:
//!
//! ```text
//! arbiter-<uuid>-XXXXXX/
//!   shared/            (or case-1/, case-2/, ...)
//!     src/main.py      bound read-only into every sandbox
//!     build/           writable only while compiling
//! ```
//!
//! The directory is removed exactly once: by `release` on the normal path,
//! or by `Drop` when the owning future is cancelled or panics.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

const DIR_MODE: u32 = 0o755;
const BUILD_DIR_MODE: u32 = 0o777;
const SOURCE_MODE: u32 = 0o644;

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh, empty directory keyed by a new execution id
    pub fn acquire(&self) -> std::io::Result<Workspace> {
        fs::create_dir_all(&self.root)?;

        let id = Uuid::new_v4();
        let dir = tempfile::Builder::new()
            .prefix(&format!("arbiter-{}-", id))
            .tempdir_in(&self.root)?;
        // sandboxes run as an unprivileged uid and must be able to traverse it
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(DIR_MODE))?;

        debug!(execution_id = %id, path = %dir.path().display(), "Workspace acquired");
        Ok(Workspace { id, dir: Some(dir) })
    }
}

/// A staged source tree inside a workspace
#[derive(Debug, Clone)]
pub struct Slot {
    pub name: String,
    pub src_dir: PathBuf,
    pub build_dir: PathBuf,
}

#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    // `None` only after release
    dir: Option<TempDir>,
}

impl Workspace {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        self.dir
            .as_ref()
            .map(TempDir::path)
            .unwrap_or_else(|| Path::new(""))
    }

    /// Write `source` to `<slot>/src/<file_name>` and create an empty `<slot>/build`
    pub fn stage(&self, slot: &str, file_name: &str, source: &str) -> std::io::Result<Slot> {
        let slot_dir = self.path().join(slot);
        let src_dir = slot_dir.join("src");
        let build_dir = slot_dir.join("build");

        fs::create_dir_all(&src_dir)?;
        fs::create_dir_all(&build_dir)?;
        fs::set_permissions(&slot_dir, fs::Permissions::from_mode(DIR_MODE))?;
        fs::set_permissions(&src_dir, fs::Permissions::from_mode(DIR_MODE))?;
        fs::set_permissions(&build_dir, fs::Permissions::from_mode(BUILD_DIR_MODE))?;

        let file = src_dir.join(file_name);
        fs::write(&file, source)?;
        fs::set_permissions(&file, fs::Permissions::from_mode(SOURCE_MODE))?;

        Ok(Slot {
            name: slot.to_string(),
            src_dir,
            build_dir,
        })
    }

    /// Remove the directory tree. Failure is logged, never returned.
    pub async fn release(mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let id = self.id;
        let path = dir.path().to_path_buf();

        let result = tokio::task::spawn_blocking(move || dir.close()).await;
        match result {
            Ok(Ok(())) => debug!(execution_id = %id, "Workspace released"),
            Ok(Err(e)) => warn!(
                execution_id = %id,
                path = %path.display(),
                error = %e,
                "Workspace cleanup failed"
            ),
            Err(e) => warn!(
                execution_id = %id,
                path = %path.display(),
                error = %e,
                "Workspace cleanup task failed"
            ),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!(
                    execution_id = %self.id,
                    path = %path.display(),
                    error = %e,
                    "Workspace cleanup failed on drop"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_creates_unique_directories() {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path());

        let a = manager.acquire().unwrap();
        let b = manager.acquire().unwrap();

        assert_ne!(a.id(), b.id());
        assert_ne!(a.path(), b.path());
        assert!(a.path().is_dir());
        assert!(a.path().starts_with(root.path()));
        assert_eq!(fs::read_dir(a.path()).unwrap().count(), 0);

        a.release().await;
        b.release().await;
    }

    #[tokio::test]
    async fn test_release_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path());

        let ws = manager.acquire().unwrap();
        ws.stage("shared", "main.py", "print(1)").unwrap();
        let path = ws.path().to_path_buf();
        assert!(path.join("shared/src/main.py").exists());

        ws.release().await;
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path());

        let path = {
            let ws = manager.acquire().unwrap();
            ws.stage("case-1", "main.js", "console.log(1)").unwrap();
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_stage_layout_and_permissions() {
        let root = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(root.path()).acquire().unwrap();

        let slot = ws.stage("case-2", "Main.java", "class Main {}").unwrap();
        assert_eq!(slot.name, "case-2");
        assert_eq!(fs::read_to_string(slot.src_dir.join("Main.java")).unwrap(), "class Main {}");
        assert!(slot.build_dir.is_dir());

        let build_mode = fs::metadata(&slot.build_dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(build_mode, BUILD_DIR_MODE);
        let file_mode = fs::metadata(slot.src_dir.join("Main.java")).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, SOURCE_MODE);
    }
}
