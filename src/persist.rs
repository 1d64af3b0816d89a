//! On-disk layout: `<root>/<novel>/<chapter>/<chapter>.<ext>`, idempotent directories, overwriting writes.

use crate::scraper::ScraperError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Longest sanitized name, in bytes.
const MAX_NAME_BYTES: usize = 200;

/// Make a title safe to use as a file or directory name.
///
/// `:` and `.` become ` -`, characters illegal on common filesystems are dropped, whitespace
/// is collapsed, and empty results become `untitled`. Applying it twice changes nothing.
pub fn sanitize_title(title: &str) -> String {
    let replaced = title.replace([':', '.'], " -");
    let kept: String = replaced
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .filter(|c| !is_forbidden(*c))
        .collect();
    let mut name = kept.split_whitespace().collect::<Vec<_>>().join(" ");
    if name.len() > MAX_NAME_BYTES {
        let mut end = MAX_NAME_BYTES;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
        name = name.trim_end().to_string();
    }
    if name.is_empty() {
        return "untitled".to_string();
    }
    if is_reserved_windows_name(&name) {
        name.push('_');
    }
    name
}

fn is_forbidden(c: char) -> bool {
    matches!(c, '/' | '\\' | '?' | '<' | '>' | ':' | '*' | '|' | '"')
}

fn is_reserved_windows_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name))
}

/// `<novel_dir>/<title>/<title>.<ext>` for an already-sanitized title.
pub fn chapter_path(novel_dir: &Path, title: &str, ext: &str) -> PathBuf {
    novel_dir.join(title).join(format!("{}.{}", title, ext))
}

/// Create `path` and any missing parents. An existing directory is success.
pub async fn ensure_dir(path: &Path) -> Result<(), ScraperError> {
    match tokio::fs::create_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(ScraperError::NotADirectory {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(ScraperError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Write `content` to `path`, replacing any existing file.
///
/// The bytes go to a unique sibling first and are renamed over `path`, so concurrent writers to
/// the same path leave exactly one complete version behind (the last rename).
pub async fn write_file(path: &Path, content: &str) -> Result<(), ScraperError> {
    let io_error = |e: std::io::Error| ScraperError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    let staged = staging_path(path);
    if let Err(e) = tokio::fs::write(&staged, content.as_bytes()).await {
        let _ = tokio::fs::remove_file(&staged).await;
        return Err(io_error(e));
    }
    if let Err(e) = tokio::fs::rename(&staged, path).await {
        let _ = tokio::fs::remove_file(&staged).await;
        return Err(io_error(e));
    }
    Ok(())
}

/// Hidden `.<name>.<pid>.<seq>.tmp` next to `path`; unique per call within the process.
fn staging_path(path: &Path) -> PathBuf {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), seq))
}
