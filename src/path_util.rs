//! Path normalization helpers shared by the tracer and the analysis passes.

use std::path::{Component, Path, PathBuf};

/// Splits `path` into (stem, extension), treating purely numeric suffixes as
/// part of a versioned extension chain: `libfoo.so.1.2` splits to
/// (`libfoo`, `so`), not (`libfoo.so.1`, `2`).
fn split_extension(path: &str) -> (String, String) {
    let mut current = path.to_string();
    loop {
        let suffix = match current.rsplit_once('.') {
            Some((stem, suffix)) if !stem.is_empty() && !suffix.is_empty() => suffix.to_string(),
            _ => return (current, String::new()),
        };
        if suffix.contains('/') {
            // The final path component has no dot.
            return (current, String::new());
        }

        current.truncate(current.len() - suffix.len() - 1);
        if suffix.parse::<u64>().is_err() {
            return (current, suffix);
        }
    }
}

/// Lexically normalizes a path: removes `.` components and folds `..` into
/// its parent where possible.  Does not touch the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut ret = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !ret.pop() {
                    ret.push("..");
                }
            }
            other => ret.push(other.as_os_str()),
        }
    }
    ret
}

/// Makes `path` absolute by joining it onto `base` (itself expected to be
/// absolute) and normalizing the result.
pub fn make_absolute(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&base.join(path))
    }
}

/// Makes an absolute path relative to `base` when it lives underneath it.
/// `base` itself maps to `.`; paths outside `base` are returned unchanged.
pub fn make_relative_to(absolute_path: &Path, base: &Path) -> PathBuf {
    if absolute_path == base {
        return PathBuf::from(".");
    }
    match absolute_path.strip_prefix(base) {
        Ok(rest) => rest.to_path_buf(),
        Err(_) => absolute_path.to_path_buf(),
    }
}

/// Follows symlinks until a non-link is reached.  Bounded at 10 hops; a
/// longer chain returns the last path seen.
pub fn resolve_symlinks(path: &Path) -> PathBuf {
    let mut current = path.to_path_buf();
    for _ in 0..10 {
        match std::fs::read_link(&current) {
            Ok(target) => {
                current = if target.is_absolute() {
                    target
                } else {
                    let parent = current.parent().unwrap_or(Path::new("/"));
                    normalize(&parent.join(target))
                };
            }
            Err(_) => return current,
        }
    }
    tracing::warn!("too many symlink dereferences resolving {:?}", path);
    current
}

/// The final path component, as a string.
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// The extension of the final component, skipping numeric version suffixes.
pub fn extension(path: &Path) -> String {
    split_extension(&path.to_string_lossy()).1
}

/// The path with its extension (and any numeric version suffixes) removed.
pub fn path_without_extension(path: &Path) -> String {
    split_extension(&path.to_string_lossy()).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_simple() {
        assert_eq!(extension(Path::new("foo.c")), "c");
        assert_eq!(extension(Path::new("dir/foo.cpp")), "cpp");
        assert_eq!(extension(Path::new("foo")), "");
    }

    #[test]
    fn test_extension_versioned_library() {
        assert_eq!(extension(Path::new("libfoo.so.1")), "so");
        assert_eq!(extension(Path::new("libfoo.so.1.2.3")), "so");
        assert_eq!(path_without_extension(Path::new("libfoo.so.1.2.3")), "libfoo");
    }

    #[test]
    fn test_extension_dot_in_directory() {
        assert_eq!(extension(Path::new("a.dir/foo")), "");
        assert_eq!(extension(Path::new("a.dir/foo.o")), "o");
    }

    #[test]
    fn test_path_without_extension() {
        assert_eq!(path_without_extension(Path::new("src/foo.c")), "src/foo");
        assert_eq!(path_without_extension(Path::new("foo")), "foo");
    }

    #[test]
    fn test_make_absolute() {
        assert_eq!(
            make_absolute(Path::new("foo/bar.c"), Path::new("/work")),
            PathBuf::from("/work/foo/bar.c")
        );
        assert_eq!(
            make_absolute(Path::new("/abs/x"), Path::new("/work")),
            PathBuf::from("/abs/x")
        );
        assert_eq!(
            make_absolute(Path::new("../x"), Path::new("/work/sub")),
            PathBuf::from("/work/x")
        );
        assert_eq!(
            make_absolute(Path::new("./x/./y"), Path::new("/w")),
            PathBuf::from("/w/x/y")
        );
    }

    #[test]
    fn test_make_relative_to() {
        assert_eq!(
            make_relative_to(Path::new("/proj/src/a.c"), Path::new("/proj")),
            PathBuf::from("src/a.c")
        );
        assert_eq!(
            make_relative_to(Path::new("/proj"), Path::new("/proj")),
            PathBuf::from(".")
        );
        assert_eq!(
            make_relative_to(Path::new("/usr/lib/x.so"), Path::new("/proj")),
            PathBuf::from("/usr/lib/x.so")
        );
    }

    #[test]
    fn test_resolve_symlinks_plain_file() {
        // A path that isn't a symlink resolves to itself.
        assert_eq!(resolve_symlinks(Path::new("/nonexistent/x")), PathBuf::from("/nonexistent/x"));
    }

    #[test]
    fn test_resolve_symlinks_follows_links() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        let link = dir.path().join("link");
        std::fs::write(&target, b"x").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();
        assert_eq!(resolve_symlinks(&link), target);
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name(Path::new("/usr/bin/gcc")), "gcc");
        assert_eq!(file_name(Path::new("gcc")), "gcc");
    }
}
