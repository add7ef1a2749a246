//! Content-derived storage paths.

use std::path::{Component, Path, PathBuf};

use crate::error::{BlobStoreError, Result};

/// Build the relative storage path for a blob.
///
/// The first byte of the digest, as two lowercase hex characters, names the
/// shard directory; the full digest plus the extension names the file:
/// `6b/6bebd6bf...62ddc.mkv`. This caps top-level fan-out at 256 directories.
///
/// The extension is used as given; check it with [`validate_extension`].
pub fn build_path(sha256: &[u8; 32], extension: &str) -> String {
    format!("{:02x}/{}.{}", sha256[0], hex::encode(sha256), extension)
}

/// Check that an extension is 2-6 ASCII alphanumeric characters.
pub fn validate_extension(extension: &str) -> Result<()> {
    if !(2..=6).contains(&extension.len()) {
        return Err(BlobStoreError::InvalidInput(format!(
            "extension must be 2-6 characters, got {:?}",
            extension
        )));
    }
    if !extension.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(BlobStoreError::InvalidInput(format!(
            "extension must be alphanumeric without a leading separator, got {:?}",
            extension
        )));
    }
    Ok(())
}

/// Normalize the configured base directory.
///
/// The directory must be absolute. `.` components, repeated and trailing
/// separators are dropped; `..` is rejected outright.
pub fn sanitize_base(dir: &Path) -> Result<PathBuf> {
    if !dir.is_absolute() {
        return Err(BlobStoreError::InvalidConfig(format!(
            "base directory must be absolute: {}",
            dir.display()
        )));
    }

    let mut clean = PathBuf::new();
    for component in dir.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                clean.push(component.as_os_str())
            }
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(BlobStoreError::InvalidConfig(format!(
                    "base directory must not contain '..': {}",
                    dir.display()
                )))
            }
        }
    }
    Ok(clean)
}

/// Join a stored relative path under the base directory.
///
/// Both `/` and `\` are accepted as separators. Anything that would leave the
/// base directory (`..`, an absolute path, a drive prefix) is rejected.
pub fn resolve_path(base: &Path, relative: &str) -> Result<PathBuf> {
    let normalized = relative.replace('\\', "/");
    let mut resolved = base.to_path_buf();
    let mut pushed = false;

    for part in normalized.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        let mut components = Path::new(part).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => {
                resolved.push(name);
                pushed = true;
            }
            _ => {
                return Err(BlobStoreError::InvalidInput(format!(
                    "path escapes base directory: {}",
                    relative
                )))
            }
        }
    }

    if !pushed {
        return Err(BlobStoreError::InvalidInput(format!(
            "empty relative path: {:?}",
            relative
        )));
    }
    Ok(resolved)
}
