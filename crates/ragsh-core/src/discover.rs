//! Discovery module: Find the .ragsh project root by walking up the directory tree

use std::path::{Path, PathBuf};

use crate::{RAGSH_DIR, RagError, Result};

/// Find the project root by walking up from the given path.
///
/// Returns the path to the directory containing .ragsh (not the .ragsh folder itself).
pub fn find_project_root(start: &Path) -> Result<PathBuf> {
    let mut current = start.canonicalize()?;

    loop {
        if current.join(RAGSH_DIR).is_dir() {
            return Ok(current);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return Err(RagError::NotInProject),
        }
    }
}

/// Create the .ragsh folder in `root`.
pub fn init_project(root: &Path) -> Result<PathBuf> {
    let dir = project_dir(root);
    if dir.exists() {
        return Err(RagError::AlreadyInitialized(dir));
    }
    std::fs::create_dir_all(index_dir(root))?;
    Ok(dir)
}

/// Get the .ragsh directory path for a given root.
pub fn project_dir(root: &Path) -> PathBuf {
    root.join(RAGSH_DIR)
}

/// Get the directory persisted indexes live in.
pub fn index_dir(root: &Path) -> PathBuf {
    project_dir(root).join("index")
}

/// Get the config file path.
pub fn config_path(root: &Path) -> PathBuf {
    project_dir(root).join("config.json")
}
