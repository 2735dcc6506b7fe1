//! Content hashing of files touched by the traced build.

use sha1::{Digest, Sha1};
use std::io::Read;
use std::path::Path;

/// SHA-1 of the file's contents, or `None` for anything that shouldn't be
/// hashed: missing files, directories, devices, zero-length files, and
/// pseudo-filesystems under /sys and /proc.
pub fn sha1_file(path: &Path) -> Option<Vec<u8>> {
    if path.starts_with("/sys") || path.starts_with("/proc") {
        return None;
    }

    let metadata = std::fs::symlink_metadata(path).ok()?;
    if !metadata.is_file() || metadata.len() == 0 {
        return None;
    }

    let mut file = std::fs::File::open(path).ok()?;
    let mut hasher = Sha1::new();
    let mut buf = [0u8; 4096];
    loop {
        match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buf[..n]),
            Err(_) => return None,
        }
    }
    Some(hasher.finalize().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashes_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"hello").unwrap();
        let hash = sha1_file(&path).unwrap();
        assert_eq!(hex::encode(hash), "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
    }

    #[test]
    fn test_empty_file_not_hashed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();
        assert_eq!(sha1_file(&path), None);
    }

    #[test]
    fn test_missing_file_not_hashed() {
        assert_eq!(sha1_file(Path::new("/nonexistent/nope")), None);
    }

    #[test]
    fn test_directory_not_hashed() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(sha1_file(dir.path()), None);
    }

    #[test]
    fn test_pseudo_fs_not_hashed() {
        assert_eq!(sha1_file(Path::new("/proc/self/status")), None);
        assert_eq!(sha1_file(Path::new("/sys/kernel")), None);
    }

    #[test]
    fn test_same_contents_same_hash() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, b"contents").unwrap();
        std::fs::write(&b, b"contents").unwrap();
        assert_eq!(sha1_file(&a), sha1_file(&b));
    }
}
