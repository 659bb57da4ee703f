use crate::errors::{GraderError, Result};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// Hands out private, uniquely named directories under a common base.
#[derive(Debug, Clone)]
pub struct SandboxManager {
    base: PathBuf,
}

impl SandboxManager {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Create a fresh, empty sandbox directory.
    pub fn acquire(&self) -> Result<Sandbox> {
        std::fs::create_dir_all(&self.base).map_err(|e| {
            GraderError::SandboxAllocation(format!("{}: {}", self.base.display(), e))
        })?;

        let path = self.base.join(format!("eval-{}", uuid::Uuid::new_v4()));
        // create_dir (not create_dir_all) so a name collision is an error
        std::fs::create_dir(&path).map_err(|e| {
            GraderError::SandboxAllocation(format!("{}: {}", path.display(), e))
        })?;

        info!("[SANDBOX] Created sandbox: {:?}", path);
        Ok(Sandbox {
            path,
            released: false,
        })
    }

    /// Recursively delete a sandbox directory. Idempotent, and never fails:
    /// problems are logged.
    pub fn release(path: &Path) {
        match std::fs::remove_dir_all(path) {
            Ok(()) => info!("[SANDBOX] Cleaned up sandbox: {:?}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("[SANDBOX] Sandbox already gone: {:?}", path)
            }
            Err(e) => warn!("[SANDBOX] Failed to cleanup sandbox {:?}: {}", path, e),
        }
    }
}

/// A sandbox owned by one evaluation. Deleted on [`Sandbox::release`] or drop.
#[derive(Debug)]
pub struct Sandbox {
    path: PathBuf,
    released: bool,
}

impl Sandbox {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy caller-supplied files into the sandbox. Relative paths keep their
    /// directory structure; absolute paths land at the sandbox root.
    pub fn materialize(&self, files: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut placed = Vec::with_capacity(files.len());
        for source in files {
            let relative = sandbox_relative(source).ok_or_else(|| {
                GraderError::InvalidRequest(format!(
                    "auxiliary file has no usable name: {}",
                    source.display()
                ))
            })?;
            if !source.exists() {
                return Err(GraderError::InvalidRequest(format!(
                    "auxiliary file not found: {}",
                    source.display()
                )));
            }

            let dest = self.path.join(&relative);
            copy_recursive(source, &dest)?;
            debug!("[SANDBOX] Copied auxiliary file: {:?} -> {:?}", source, dest);
            placed.push(relative);
        }
        Ok(placed)
    }

    pub fn release(mut self) {
        self.release_in_place();
    }

    fn release_in_place(&mut self) {
        if !self.released {
            SandboxManager::release(&self.path);
            self.released = true;
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        self.release_in_place();
    }
}

/// Path a caller file takes inside the sandbox, with anything that could
/// escape it (roots, `..`) dropped.
fn sandbox_relative(path: &Path) -> Option<PathBuf> {
    if path.is_absolute() {
        return path.file_name().map(PathBuf::from);
    }
    let relative: PathBuf = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();
    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

fn copy_recursive(source: &Path, dest: &Path) -> Result<()> {
    if source.is_dir() {
        std::fs::create_dir_all(dest)?;
        for entry in std::fs::read_dir(source)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &dest.join(entry.file_name()))?;
        }
    } else {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(source, dest)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_is_fresh_and_unique() {
        let base = tempfile::tempdir().unwrap();
        let manager = SandboxManager::new(base.path());

        let first = manager.acquire().unwrap();
        std::fs::write(first.path().join("leftover.txt"), "x").unwrap();
        let second = manager.acquire().unwrap();

        assert_ne!(first.path(), second.path());
        assert_eq!(std::fs::read_dir(second.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_release_and_drop_remove_directory() {
        let base = tempfile::tempdir().unwrap();
        let manager = SandboxManager::new(base.path());

        let sandbox = manager.acquire().unwrap();
        let path = sandbox.path().to_path_buf();
        std::fs::create_dir_all(path.join("nested/deeper")).unwrap();
        sandbox.release();
        assert!(!path.exists());

        let path = {
            let sandbox = manager.acquire().unwrap();
            sandbox.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_release_is_idempotent() {
        let base = tempfile::tempdir().unwrap();
        let sandbox = SandboxManager::new(base.path()).acquire().unwrap();
        let path = sandbox.path().to_path_buf();

        // Something else already cleaned it up
        std::fs::remove_dir_all(&path).unwrap();
        SandboxManager::release(&path);
        SandboxManager::release(&path);
        sandbox.release();
        assert!(!path.exists());
    }

    #[test]
    fn test_acquire_fails_when_base_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();

        let result = SandboxManager::new(&blocker).acquire();
        assert!(matches!(result, Err(GraderError::SandboxAllocation(_))));
    }

    #[test]
    fn test_materialize_preserves_relative_structure() {
        let base = tempfile::tempdir().unwrap();
        let sandbox = SandboxManager::new(base.path()).acquire().unwrap();

        let src_dir = tempfile::tempdir().unwrap();
        let data = src_dir.path().join("data");
        std::fs::create_dir_all(data.join("inner")).unwrap();
        std::fs::write(data.join("inner/values.csv"), "1,2,3").unwrap();
        std::fs::write(src_dir.path().join("single.txt"), "hello").unwrap();

        let placed = sandbox
            .materialize(&[data.clone(), src_dir.path().join("single.txt")])
            .unwrap();
        assert_eq!(placed, vec![PathBuf::from("data"), PathBuf::from("single.txt")]);
        assert_eq!(
            std::fs::read_to_string(sandbox.path().join("data/inner/values.csv")).unwrap(),
            "1,2,3"
        );
        assert!(sandbox.path().join("single.txt").is_file());

        let missing = sandbox.materialize(&[src_dir.path().join("absent.txt")]);
        assert!(matches!(missing, Err(GraderError::InvalidRequest(_))));
    }

    #[test]
    fn test_sandbox_relative_strips_escapes() {
        assert_eq!(
            sandbox_relative(Path::new("../../etc/passwd")),
            Some(PathBuf::from("etc/passwd"))
        );
        assert_eq!(
            sandbox_relative(Path::new("/srv/files/input.txt")),
            Some(PathBuf::from("input.txt"))
        );
        assert_eq!(sandbox_relative(Path::new("..")), None);
    }
}
