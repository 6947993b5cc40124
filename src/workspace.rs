/// Per-run workspace directories with guaranteed teardown
use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::types::{Result, SandboxError};

/// A fresh, uniquely-named directory holding one run's source, artifact and
/// side files. Never reused across runs; removed on every exit path.
#[derive(Debug)]
pub struct Workspace {
    run_id: String,
    dir: PathBuf,
    released: bool,
}

impl Workspace {
    /// Create `<base>/<uuid>` with mode 0755, ensuring `base` exists.
    pub fn create(base: &Path) -> Result<Self> {
        fs::create_dir_all(base).map_err(|e| {
            SandboxError::Workspace(format!(
                "failed to create base directory {}: {e}",
                base.display()
            ))
        })?;

        let run_id = Uuid::new_v4().to_string();
        let dir = base.join(&run_id);
        fs::create_dir(&dir).map_err(|e| {
            SandboxError::Workspace(format!(
                "failed to create run directory {}: {e}",
                dir.display()
            ))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&dir, fs::Permissions::from_mode(0o755));
        }

        log::debug!("created workspace {}", dir.display());
        Ok(Self {
            run_id,
            dir,
            released: false,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Write a file into the workspace with mode 0644.
    pub fn write_file(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.dir.join(name);
        fs::write(&path, contents).map_err(|e| {
            SandboxError::Workspace(format!("failed to write {}: {e}", path.display()))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&path, fs::Permissions::from_mode(0o644));
        }

        Ok(path)
    }

    /// Remove the workspace recursively. Best-effort; failures are logged.
    /// Idempotent, and also invoked from `Drop`.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            if self.dir.exists() {
                log::warn!("failed to clean up workspace {}: {e}", self.dir.display());
            }
        } else {
            log::debug!("cleaned up workspace {}", self.dir.display());
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_base() -> PathBuf {
        std::env::temp_dir().join("croj-sandbox-ws-tests")
    }

    #[test]
    fn test_create_and_release() {
        let mut ws = Workspace::create(&test_base()).unwrap();
        let dir = ws.path().to_path_buf();
        assert!(dir.is_dir());
        ws.release();
        assert!(!dir.exists());
    }

    #[test]
    fn test_drop_removes_directory() {
        let dir;
        {
            let ws = Workspace::create(&test_base()).unwrap();
            dir = ws.path().to_path_buf();
            assert!(dir.is_dir());
        }
        assert!(!dir.exists());
    }

    #[test]
    fn test_workspaces_are_unique() {
        let a = Workspace::create(&test_base()).unwrap();
        let b = Workspace::create(&test_base()).unwrap();
        assert_ne!(a.path(), b.path());
        assert_ne!(a.run_id(), b.run_id());
    }

    #[test]
    fn test_write_file_lands_in_workspace() {
        let ws = Workspace::create(&test_base()).unwrap();
        let path = ws.write_file("main.py", "print(1)\n").unwrap();
        assert_eq!(path.parent().unwrap(), ws.path());
        assert_eq!(fs::read_to_string(&path).unwrap(), "print(1)\n");
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut ws = Workspace::create(&test_base()).unwrap();
        ws.release();
        ws.release();
    }
}
