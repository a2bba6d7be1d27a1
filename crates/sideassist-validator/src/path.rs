//! Live filesystem probe behind `path` rules.
//!
//! Results depend on the filesystem at the moment of the call. Any failure to
//! query a capability reads as "capability absent".

use std::path::Path;

use crate::field::{PathPermission, PathType};

/// Observed state of one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathProbe {
    pub exists: bool,
    pub permissions: PathPermission,
    pub kind: PathType,
}

impl PathProbe {
    /// Query the filesystem for `path`, following symlinks.
    pub fn of(path: &Path) -> Self {
        let metadata = std::fs::metadata(path).ok();

        let mut kind = PathType::empty();
        if let Some(metadata) = &metadata {
            if metadata.is_file() {
                kind |= PathType::FILE;
            }
            if metadata.is_dir() {
                kind |= PathType::DIR;
            }
        }

        let permissions = match &metadata {
            Some(metadata) => permissions(path, metadata),
            None => PathPermission::empty(),
        };

        Self {
            exists: metadata.is_some(),
            permissions,
            kind,
        }
    }
}

#[cfg(unix)]
fn permissions(path: &Path, _metadata: &std::fs::Metadata) -> PathPermission {
    let mut perm = PathPermission::empty();
    if access(path, libc::R_OK) {
        perm |= PathPermission::READABLE;
    }
    if access(path, libc::W_OK) {
        perm |= PathPermission::WRITABLE;
    }
    if access(path, libc::X_OK) {
        perm |= PathPermission::EXECUTABLE;
    }
    perm
}

#[cfg(unix)]
fn access(path: &Path, mode: libc::c_int) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: `c_path` is a valid NUL-terminated string that outlives the call,
    // and access(2) does not retain the pointer.
    unsafe { libc::access(c_path.as_ptr(), mode) == 0 }
}

#[cfg(not(unix))]
fn permissions(_path: &Path, metadata: &std::fs::Metadata) -> PathPermission {
    let mut perm = PathPermission::READABLE;
    if !metadata.permissions().readonly() {
        perm |= PathPermission::WRITABLE;
    }
    perm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_regular_file_and_directory() {
        let dir = std::env::temp_dir().join(format!("sideassist-probe-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("probe.txt");
        std::fs::write(&file, b"probe").unwrap();

        let file_probe = PathProbe::of(&file);
        assert!(file_probe.exists);
        assert_eq!(file_probe.kind, PathType::FILE);
        assert!(file_probe.permissions.contains(PathPermission::READABLE));
        assert!(file_probe.permissions.contains(PathPermission::WRITABLE));

        let dir_probe = PathProbe::of(&dir);
        assert!(dir_probe.exists);
        assert_eq!(dir_probe.kind, PathType::DIR);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn probe_missing_path_has_no_capabilities() {
        let probe = PathProbe::of(Path::new("/definitely/not/here/sideassist"));
        assert!(!probe.exists);
        assert!(probe.kind.is_empty());
        assert!(probe.permissions.is_empty());
    }
}
