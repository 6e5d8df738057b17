//! Cache entry archives: the files under a job's cache paths as a
//! zstd-compressed tarball

use super::CacheError;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

const ZSTD_LEVEL: i32 = 3;

/// Pack every path (relative to `root`) into a compressed archive.
///
/// Missing paths are skipped. Symlinks are stored as links, never followed.
pub fn pack(root: &Path, paths: &[String]) -> Result<Vec<u8>, CacheError> {
    let encoder = zstd::stream::write::Encoder::new(Vec::new(), ZSTD_LEVEL)?;
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    for path in paths {
        let rel = safe_relative(Path::new(path))?;
        let full = root.join(&rel);
        let metadata = match std::fs::symlink_metadata(&full) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };

        if metadata.is_dir() {
            builder.append_dir_all(&rel, &full)?;
        } else {
            builder.append_path_with_name(&full, &rel)?;
        }
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

/// Unpack an archive under `root`, returning the number of files written
pub fn unpack(root: &Path, data: &[u8]) -> Result<usize, CacheError> {
    let decoder = zstd::stream::read::Decoder::new(data)?;
    let mut archive = tar::Archive::new(decoder);

    let mut files = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        safe_relative(&path)?;

        if !entry.unpack_in(root)? {
            return Err(CacheError::Archive(format!(
                "entry '{}' escapes the workspace",
                path.display()
            )));
        }
        if entry.header().entry_type().is_file() {
            files += 1;
        }
    }
    Ok(files)
}

/// Reject absolute paths and `..` so entries stay under the root
pub fn safe_relative(path: &Path) -> Result<PathBuf, CacheError> {
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(CacheError::Archive(format!(
            "cache path '{}' must stay inside the workspace",
            path.display()
        )));
    }
    Ok(path.to_path_buf())
}
