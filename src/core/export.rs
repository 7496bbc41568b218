//! CK-016: Write generated files to disk or a zip archive.
//!
//! Paths are project-relative. Anything absolute or escaping with `..` is
//! rejected before a byte is written.

use super::types::GeneratedFile;
use indexmap::IndexMap;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

/// Reject empty, absolute, and parent-escaping paths.
pub fn check_relative_path(path: &str) -> Result<(), String> {
    if path.trim().is_empty() {
        return Err("file path is empty".to_string());
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(format!("file path '{}' is absolute", path));
    }
    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(format!("file path '{}' escapes the project root", path))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("file path '{}' is absolute", path))
            }
        }
    }
    Ok(())
}

/// Write every file under `out_dir`. Returns the paths written.
pub fn export_files(files: &[GeneratedFile], out_dir: &Path) -> Result<Vec<PathBuf>, String> {
    for f in files {
        check_relative_path(&f.path)?;
    }

    let mut written = Vec::with_capacity(files.len());
    for f in files {
        let path = out_dir.join(&f.path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create dir {}: {}", parent.display(), e))?;
        }
        write_atomic(&path, f.content.as_bytes())?;
        written.push(path);
    }
    Ok(written)
}

/// Write a deflate zip of every file to `zip_path`. When two chunks emit the
/// same path the later one wins, matching a directory export.
pub fn export_zip(files: &[GeneratedFile], zip_path: &Path) -> Result<usize, String> {
    let mut latest: IndexMap<&str, &GeneratedFile> = IndexMap::new();
    for f in files {
        check_relative_path(&f.path)?;
        latest.insert(f.path.trim_start_matches("./"), f);
    }
    if let Some(parent) = zip_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create dir {}: {}", parent.display(), e))?;
    }

    let tmp_path = tmp_sibling(zip_path);
    let file = std::fs::File::create(&tmp_path)
        .map_err(|e| format!("cannot create {}: {}", tmp_path.display(), e))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for (name, f) in &latest {
        zip.start_file(*name, options)
            .map_err(|e| format!("zip error on {}: {}", f.path, e))?;
        zip.write_all(f.content.as_bytes())
            .map_err(|e| format!("zip write error on {}: {}", f.path, e))?;
    }
    zip.finish().map_err(|e| format!("zip finish error: {}", e))?;

    std::fs::rename(&tmp_path, zip_path).map_err(|e| {
        format!(
            "cannot rename {} → {}: {}",
            tmp_path.display(),
            zip_path.display(),
            e
        )
    })?;
    Ok(latest.len())
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), String> {
    let tmp_path = tmp_sibling(path);
    std::fs::write(&tmp_path, bytes)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        format!(
            "cannot rename {} → {}: {}",
            tmp_path.display(),
            path.display(),
            e
        )
    })
}
