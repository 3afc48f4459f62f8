use crate::error::ToolError;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Replaces `path` with `bytes` so that readers observe either the old or the
/// new contents, never a prefix of the new ones.
pub fn write_file_atomic(path: &Path, bytes: &[u8]) -> Result<(), ToolError> {
    let ctx = || path.display().to_string();
    let dir = parent_dir(path);
    fs::create_dir_all(dir).map_err(|e| ToolError::io_at(ctx(), e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| ToolError::io_at(ctx(), e))?;
    tmp.write_all(bytes).map_err(|e| ToolError::io_at(ctx(), e))?;
    tmp.flush().map_err(|e| ToolError::io_at(ctx(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| ToolError::io_at(ctx(), e))?;
    tmp.persist(path)
        .map_err(|e| ToolError::io_at(ctx(), e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

/// Copies `src` to `dst` byte for byte. `dst` must not exist yet. The copy
/// is staged next to `dst` and only appears under its name once fully synced,
/// so a failed copy leaves nothing at `dst`.
pub fn copy_file_exclusive(src: &Path, dst: &Path) -> Result<u64, ToolError> {
    let src_ctx = || src.display().to_string();
    let dst_ctx = || dst.display().to_string();
    if dst.exists() {
        return Err(refuse_overwrite(dst));
    }
    let mut reader = fs::File::open(src).map_err(|e| ToolError::io_at(src_ctx(), e))?;
    let dir = parent_dir(dst);
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| ToolError::io_at(dst_ctx(), e))?;

    let mut buf = vec![0u8; 64 * 1024];
    let mut copied = 0u64;
    loop {
        let n = reader.read(&mut buf).map_err(|e| ToolError::io_at(src_ctx(), e))?;
        if n == 0 {
            break;
        }
        tmp.write_all(&buf[..n])
            .map_err(|e| ToolError::io_at(dst_ctx(), e))?;
        copied += n as u64;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| ToolError::io_at(dst_ctx(), e))?;
    tmp.persist_noclobber(dst).map_err(|e| {
        if e.error.kind() == io::ErrorKind::AlreadyExists {
            refuse_overwrite(dst)
        } else {
            ToolError::io_at(dst_ctx(), e.error)
        }
    })?;
    fsync_dir(dir)?;
    Ok(copied)
}

fn refuse_overwrite(dst: &Path) -> ToolError {
    ToolError::PreconditionFailed(format!(
        "refusing to overwrite existing file {}",
        dst.display()
    ))
}

pub fn fsync_dir(path: &Path) -> Result<(), ToolError> {
    let dir = fs::File::open(path).map_err(|e| ToolError::io_at(path.display().to_string(), e))?;
    dir.sync_all()
        .map_err(|e| ToolError::io_at(path.display().to_string(), e))?;
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::{copy_file_exclusive, write_file_atomic};
    use crate::error::ToolErrorCode;
    use tempfile::tempdir;

    #[test]
    fn atomic_write_replaces_contents_and_leaves_no_temp_files() {
        let dir = tempdir().expect("temp");
        let path = dir.path().join("control");
        write_file_atomic(&path, b"first").expect("write 1");
        write_file_atomic(&path, b"second").expect("write 2");
        assert_eq!(std::fs::read(&path).expect("read"), b"second");
        let entries = std::fs::read_dir(dir.path()).expect("ls").count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn exclusive_copy_is_byte_identical_and_never_overwrites() {
        let dir = tempdir().expect("temp");
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        std::fs::write(&src, b"\x00payload\xff").expect("src");
        assert_eq!(copy_file_exclusive(&src, &dst).expect("copy"), 9);
        assert_eq!(std::fs::read(&dst).expect("dst"), std::fs::read(&src).expect("src"));

        std::fs::write(&src, b"changed").expect("src 2");
        let err = copy_file_exclusive(&src, &dst).expect_err("collision");
        assert_eq!(err.code(), ToolErrorCode::PreconditionFailed);
        assert_eq!(std::fs::read(&dst).expect("dst"), b"\x00payload\xff");
    }

    #[test]
    fn exclusive_copy_of_missing_source_creates_nothing() {
        let dir = tempdir().expect("temp");
        let dst = dir.path().join("dst");
        let err = copy_file_exclusive(&dir.path().join("missing"), &dst).expect_err("missing");
        assert!(err.is_io_kind(std::io::ErrorKind::NotFound));
        assert!(!dst.exists());
    }

    #[test]
    fn unreadable_source_leaves_no_partial_copy() {
        let dir = tempdir().expect("temp");
        let src = dir.path().join("not-a-file");
        std::fs::create_dir(&src).expect("src dir");
        let dst = dir.path().join("cmeta.pre_rewrite.1");

        let err = copy_file_exclusive(&src, &dst).expect_err("directory source");
        assert_eq!(err.code(), ToolErrorCode::Io);
        assert!(err.to_string().contains("not-a-file"), "{err}");
        assert!(!dst.exists());
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .expect("ls")
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["not-a-file".to_string()]);
    }
}
