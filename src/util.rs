use crate::error::{Error, Result};
use sha2::Digest;
use std::fs;
use std::path::{Component, Path};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub fn display_path(path: &Path, base: Option<&Path>) -> String {
    if let Some(base) = base {
        if let Ok(relative) = path.strip_prefix(base) {
            return relative.display().to_string();
        }
    }
    path.display().to_string()
}

pub fn truncate_string(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut truncated = String::new();
    for ch in text.chars() {
        if truncated.len() + ch.len_utf8() > max_bytes {
            break;
        }
        truncated.push(ch);
    }
    truncated
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Write through a sibling temp file so readers never see a partial file.
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|err| Error::io(parent, err))?;
    }
    let file_name = dest
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("staged");
    let tmp_path = dest
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!(".{file_name}.tmp"));
    fs::write(&tmp_path, bytes).map_err(|err| Error::io(&tmp_path, err))?;
    fs::rename(&tmp_path, dest).map_err(|err| Error::io(dest, err))?;
    Ok(())
}

/// Point `link` at `target`, replacing an existing symlink but never a real
/// file or directory.
pub fn replace_symlink(target: &Path, link: &Path) -> Result<()> {
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent).map_err(|err| Error::io(parent, err))?;
    }
    match fs::symlink_metadata(link) {
        Ok(meta) if meta.file_type().is_symlink() => {
            if fs::read_link(link).ok().as_deref() == Some(target) {
                return Ok(());
            }
            fs::remove_file(link).map_err(|err| Error::io(link, err))?;
        }
        Ok(_) => {
            return Err(Error::io(
                link,
                std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "refusing to replace a non-symlink entry",
                ),
            ));
        }
        Err(_) => {}
    }
    symlink(target, link).map_err(|err| Error::io(link, err))
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

/// Lexically join `rel` onto `base`, folding `.` and `..` components.
///
/// Returns `None` when `..` would climb above the start of `base`.
pub fn normalize_join(base: &str, rel: &str) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    let joined = Path::new(base).join(rel);
    for component in joined.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(parts.join("/"))
}

/// Split `path` into (parent directory, file name) using `/` separators.
pub fn split_parent(path: &str) -> Option<(&str, &str)> {
    path.rsplit_once('/')
}

/// Current epoch time in milliseconds for artifact timestamps.
pub fn now_epoch_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis()
}
