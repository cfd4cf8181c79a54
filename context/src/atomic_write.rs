//! Temp-file-then-rename writes.
//!
//! Readers see either the old contents or the new contents, never a partial
//! file. Used for the config file and conversation exports.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

#[derive(Debug, Clone, Copy)]
pub struct AtomicWriteOptions {
    /// `sync_all()` the temp file before the rename.
    pub sync_all: bool,
    /// Best-effort `sync_all()` on the parent directory after the rename.
    pub dir_sync: bool,
    /// Unix only: mode applied to the temp file before writing (e.g. `0o600`).
    pub unix_mode: Option<u32>,
}

impl Default for AtomicWriteOptions {
    fn default() -> Self {
        Self {
            sync_all: true,
            dir_sync: false,
            unix_mode: None,
        }
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn prepare_temp(path: &Path, bytes: &[u8], options: AtomicWriteOptions) -> std::io::Result<NamedTempFile> {
    let mut tmp = NamedTempFile::new_in(parent_dir(path))?;
    #[cfg(unix)]
    if let Some(mode) = options.unix_mode {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(mode))?;
    }
    tmp.write_all(bytes)?;
    if options.sync_all {
        tmp.as_file().sync_all()?;
    }
    Ok(tmp)
}

fn sync_parent(path: &Path) {
    let parent = parent_dir(path);
    #[cfg(unix)]
    if let Err(e) = std::fs::File::open(parent).and_then(|dir| dir.sync_all()) {
        tracing::debug!(path = %parent.display(), "Parent directory sync failed (best-effort): {e}");
    }
    #[cfg(not(unix))]
    let _ = parent;
}

/// Replaces `path` with `bytes`, creating it if needed.
pub fn atomic_write_with_options(
    path: impl AsRef<Path>,
    bytes: &[u8],
    options: AtomicWriteOptions,
) -> std::io::Result<()> {
    let path = path.as_ref();
    let tmp = prepare_temp(path, bytes, options)?;
    tmp.persist(path).map_err(|e| e.error)?;
    if options.dir_sync {
        sync_parent(path);
    }
    Ok(())
}

pub fn atomic_write(path: impl AsRef<Path>, bytes: &[u8]) -> std::io::Result<()> {
    atomic_write_with_options(path, bytes, AtomicWriteOptions::default())
}

/// Like [`atomic_write_with_options`] but fails with `AlreadyExists` instead of replacing.
pub fn atomic_write_new(
    path: impl AsRef<Path>,
    bytes: &[u8],
    options: AtomicWriteOptions,
) -> std::io::Result<()> {
    let path = path.as_ref();
    let tmp = prepare_temp(path, bytes, options)?;
    tmp.persist_noclobber(path).map_err(|e| e.error)?;
    if options.dir_sync {
        sync_parent(path);
    }
    Ok(())
}
