use crate::error::{Result, XtaskError};
use std::path::{Path, PathBuf};

/// The workspace root: the parent of this crate's manifest directory.
pub fn repo_root() -> Result<PathBuf> {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| XtaskError::Message("xtask manifest has no parent directory".into()))
}

pub fn display_rel_path(path: &Path) -> String {
    match repo_root() {
        Ok(root) => path.strip_prefix(&root).unwrap_or(path).display().to_string(),
        Err(_) => path.display().to_string(),
    }
}
